//! Template rendering
//!
//! Templates are plain strings with `{{first_name}}` and `{{company}}`
//! placeholders. Unknown placeholders are left as written.

use crate::config::Templates;
use crate::models::Lead;

/// Which scripted message to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Initial,
    FollowUp1,
    FollowUp2,
    Interested,
}

impl TemplateKind {
    /// Template for follow-up number `n` (1-based). The second template is
    /// reused for any follow-up past the first.
    pub fn follow_up(n: u32) -> Self {
        if n <= 1 { Self::FollowUp1 } else { Self::FollowUp2 }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::FollowUp1 => "followup_1",
            Self::FollowUp2 => "followup_2",
            Self::Interested => "interested",
        }
    }
}

/// Subject and body ready for composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
}

impl Templates {
    /// Render `kind` for `lead`
    pub fn render(&self, kind: TemplateKind, lead: &Lead) -> RenderedTemplate {
        let (subject, body) = match kind {
            TemplateKind::Initial => (&self.initial_subject, &self.initial),
            TemplateKind::FollowUp1 => (&self.follow_up_subject, &self.followup_1),
            TemplateKind::FollowUp2 => (&self.follow_up_subject, &self.followup_2),
            TemplateKind::Interested => (&self.interested_subject, &self.interested),
        };

        RenderedTemplate {
            subject: render_placeholders(subject, &lead.first_name, &lead.company),
            body: render_placeholders(body, &lead.first_name, &lead.company),
        }
    }
}

/// Substitute the lead placeholders
///
/// An empty first name renders as "there" so greetings still read.
pub fn render_placeholders(template: &str, first_name: &str, company: &str) -> String {
    let first_name = if first_name.trim().is_empty() {
        "there"
    } else {
        first_name.trim()
    };
    let company = if company.trim().is_empty() {
        "your team"
    } else {
        company.trim()
    };

    template
        .replace("{{first_name}}", first_name)
        .replace("{{company}}", company)
}
