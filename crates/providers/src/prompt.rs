use tera::{Context, Tera};

/// Template for the reply-generation prompt. Bound per interaction with the
/// client identity, conversation step, and the inbound message.
const REPLY_PROMPT: &str = r#"You are the appointment assistant for a small business.
Answer in {{ language }}. Be brief and concrete; never invent availability.

Client: {{ client_name }}
Conversation step: {{ current_step }}
{% if context_note %}Context: {{ context_note }}
{% endif %}Client message: {{ inbound_message }}

Write the reply message only, with no preamble."#;

#[derive(Clone, Debug)]
pub struct PromptInput<'a> {
    pub client_name: &'a str,
    pub language: &'a str,
    pub current_step: &'a str,
    pub inbound_message: &'a str,
    pub context_note: Option<&'a str>,
}

pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template("reply_prompt", REPLY_PROMPT)?;
        Ok(Self { tera })
    }

    pub fn reply_prompt(&self, input: &PromptInput<'_>) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("client_name", input.client_name);
        context.insert("language", input.language);
        context.insert("current_step", input.current_step);
        context.insert("inbound_message", input.inbound_message);
        if let Some(note) = input.context_note {
            context.insert("context_note", note);
        }
        self.tera.render("reply_prompt", &context)
    }
}
