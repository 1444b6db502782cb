use std::collections::HashMap;

use wrench_core::{EventType, Payload};

use crate::error::NotificationError;
use crate::types::RenderedContent;

/// Simple template renderer using {{variable}} syntax
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

impl TemplateRenderer {
    /// Id of the template used when an event type has none registered.
    pub const FALLBACK: &'static str = "default";

    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Renderer with the built-in work-order templates.
    pub fn with_defaults() -> Self {
        let mut renderer = Self::new();
        renderer.register(Template::new(
            EventType::WORK_ORDER_CREATED.as_str(),
            "New work order #{{workOrderId}}: {{title}}",
            "A {{priority}} priority {{category}} work order was submitted: {{title}}.",
        ));
        renderer.register(Template::new(
            EventType::WORK_ORDER_ASSIGNED.as_str(),
            "Work order #{{workOrderId}} assigned to you",
            "You have been assigned \"{{title}}\" ({{priority}} priority, {{category}}).",
        ));
        renderer.register(Template::new(
            EventType::WORK_ORDER_STARTED.as_str(),
            "Work on #{{workOrderId}} has started",
            "A technician has started working on \"{{title}}\".",
        ));
        renderer.register(Template::new(
            EventType::WORK_ORDER_COMPLETED.as_str(),
            "Work order #{{workOrderId}} completed",
            "\"{{title}}\" has been completed. Resolution: {{resolution}}",
        ));
        renderer.register(Template::new(
            Self::FALLBACK,
            "Work order #{{workOrderId}} update",
            "{{title}}: {{status}}",
        ));
        renderer
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn render(
        &self,
        template_id: &str,
        data: &Payload,
    ) -> Result<RenderedContent, NotificationError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or(NotificationError::TemplateNotFound(template_id.to_string()))?;

        Ok(RenderedContent {
            subject: self.render_string(&template.subject, data),
            body: self.render_string(&template.body, data),
        })
    }

    /// Render the template for an event type, falling back to [`Self::FALLBACK`].
    pub fn render_event(
        &self,
        event_type: &EventType,
        data: &Payload,
    ) -> Result<RenderedContent, NotificationError> {
        match self.render(event_type.as_str(), data) {
            Err(NotificationError::TemplateNotFound(_)) => self.render(Self::FALLBACK, data),
            other => other,
        }
    }

    /// Fill `{{key}}` placeholders in one pass over the template. Values are
    /// inserted verbatim; placeholders without a payload field render empty.
    fn render_string(&self, template: &str, data: &Payload) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let key = rest[start + 2..start + 2 + len].trim();
            if let Some(value) = data.get(key) {
                push_value(&mut out, value);
            }
            rest = &rest[start + 2 + len + 2..];
        }
        out.push_str(rest);
        out
    }
}

fn push_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new(
            "test",
            "Hello {{name}}",
            "Your visit is on {{date}}",
        ));

        let data = Payload::new().with("name", "John").with("date", "2024-01-15");

        let result = renderer.render("test", &data).unwrap();
        assert_eq!(result.subject, "Hello John");
        assert_eq!(result.body, "Your visit is on 2024-01-15");
    }

    #[test]
    fn test_render_with_numbers() {
        let renderer = TemplateRenderer::with_defaults();
        let data = Payload::new()
            .with("workOrderId", 42)
            .with("title", "Pump noise");

        let result = renderer
            .render_event(&EventType::WORK_ORDER_ASSIGNED, &data)
            .unwrap();
        assert_eq!(result.subject, "Work order #42 assigned to you");
    }

    #[test]
    fn test_missing_fields_render_empty() {
        let renderer = TemplateRenderer::with_defaults();
        let data = Payload::new().with("workOrderId", 7).with("title", "Door");

        let result = renderer
            .render_event(&EventType::WORK_ORDER_COMPLETED, &data)
            .unwrap();
        assert_eq!(result.body, "\"Door\" has been completed. Resolution: ");
    }

    #[test]
    fn test_unknown_event_uses_fallback() {
        let renderer = TemplateRenderer::with_defaults();
        let data = Payload::new()
            .with("workOrderId", 9)
            .with("title", "Lift")
            .with("status", "cancelled");

        let result = renderer
            .render_event(&EventType::WORK_ORDER_STATUS_CHANGED, &data)
            .unwrap();
        assert_eq!(result.subject, "Work order #9 update");
        assert_eq!(result.body, "Lift: cancelled");
    }

    #[test]
    fn test_payload_values_are_not_expanded() {
        let renderer = TemplateRenderer::with_defaults();
        let data = Payload::new()
            .with("workOrderId", 3)
            .with("title", "Fix {{priority}} label {{x}}")
            .with("priority", "urgent")
            .with("category", "signage");

        let result = renderer
            .render_event(&EventType::WORK_ORDER_CREATED, &data)
            .unwrap();
        assert_eq!(result.subject, "New work order #3: Fix {{priority}} label {{x}}");
        assert_eq!(
            result.body,
            "A urgent priority signage work order was submitted: Fix {{priority}} label {{x}}."
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new("t", "Hi {{ name }}", "Open {{brace"));
        let result = renderer
            .render("t", &Payload::new().with("name", "Ada"))
            .unwrap();
        assert_eq!(result.subject, "Hi Ada");
        assert_eq!(result.body, "Open {{brace");
    }

    #[test]
    fn test_template_not_found() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("nonexistent", &Payload::new());
        assert!(matches!(
            result,
            Err(NotificationError::TemplateNotFound(_))
        ));
    }
}
