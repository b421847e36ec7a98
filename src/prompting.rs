use minijinja::{context, Environment};

use crate::types::{AutomationSettings, CommunicationStyle, TrainingDocument, TriggerRule};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

/// Upper bound for the knowledge excerpt, in characters.
pub const KNOWLEDGE_CHAR_BUDGET: usize = 12_000;

pub struct SystemPromptContext<'a> {
    pub persona: &'a str,
    pub style: CommunicationStyle,
    pub business_name: &'a str,
    pub business_description: &'a str,
    pub business_services: &'a str,
    pub use_emojis: bool,
    pub restrict_topics: bool,
    pub signature: Option<&'a str>,
    pub knowledge: &'a str,
    pub trigger_rules: &'a [TriggerRule],
}

impl<'a> SystemPromptContext<'a> {
    pub fn from_settings(settings: &'a AutomationSettings, knowledge: &'a str) -> Self {
        Self {
            persona: settings.persona.trim(),
            style: settings.communication_style,
            business_name: settings.business_name.trim(),
            business_description: settings.business_description.trim(),
            business_services: settings.business_services.trim(),
            use_emojis: settings.use_emojis,
            restrict_topics: settings.restrict_topics,
            signature: settings
                .signature
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            knowledge,
            trigger_rules: &settings.trigger_rules,
        }
    }
}

pub fn style_directive(style: CommunicationStyle) -> &'static str {
    match style {
        CommunicationStyle::Formal => {
            "formal e profissional. Trate o cliente por \"senhor\" ou \"senhora\" e evite gírias."
        }
        CommunicationStyle::Neutral => "cordial e profissional, sem excesso de formalidade.",
        CommunicationStyle::Casual => {
            "descontraído e próximo, como uma conversa entre conhecidos, sem perder o respeito."
        }
    }
}

/// Concatenates reference documents, cut at the character budget.
pub fn knowledge_excerpt(documents: &[TrainingDocument], budget: usize) -> String {
    let joined = documents
        .iter()
        .filter(|doc| !doc.content.trim().is_empty())
        .map(|doc| {
            if doc.title.trim().is_empty() {
                doc.content.trim().to_string()
            } else {
                format!("### {}\n{}", doc.title.trim(), doc.content.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.chars().count() <= budget {
        return joined;
    }
    joined.chars().take(budget).collect()
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            persona => ctx.persona,
            style_directive => style_directive(ctx.style),
            business_name => ctx.business_name,
            business_description => ctx.business_description,
            business_services => ctx.business_services,
            use_emojis => ctx.use_emojis,
            restrict_topics => ctx.restrict_topics,
            signature => ctx.signature,
            knowledge => ctx.knowledge.trim(),
            trigger_rules => ctx.trigger_rules,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = if ctx.persona.is_empty() {
        "Você é o assistente virtual de atendimento no WhatsApp.\n".to_string()
    } else {
        format!("{}\n", ctx.persona)
    };
    prompt.push_str(&format!(
        "Estilo de comunicação: {}\n",
        style_directive(ctx.style)
    ));

    for (label, value) in [
        ("Empresa", ctx.business_name),
        ("Sobre a empresa", ctx.business_description),
        ("Serviços oferecidos", ctx.business_services),
    ] {
        if !value.is_empty() {
            prompt.push_str(&format!("\n{label}:\n{value}\n"));
        }
    }

    prompt.push_str(if ctx.use_emojis {
        "\nUse emojis com moderação.\n"
    } else {
        "\nNão use emojis.\n"
    });
    if ctx.restrict_topics {
        prompt.push_str("Fale apenas sobre assuntos relacionados à empresa.\n");
    }
    if let Some(signature) = ctx.signature {
        prompt.push_str(&format!("Termine cada resposta com a assinatura: {signature}\n"));
    }

    if !ctx.trigger_rules.is_empty() {
        prompt.push_str("\nGatilhos:\n");
        for rule in ctx.trigger_rules {
            prompt.push_str(&format!("- \"{}\" → {}\n", rule.phrase, rule.action));
        }
    }

    if !ctx.knowledge.trim().is_empty() {
        prompt.push_str("\nBase de conhecimento:\n");
        prompt.push_str(ctx.knowledge.trim());
        prompt.push('\n');
    }

    prompt
}
