//! Email template management with Handlebars
//!
//! Templates cover the alert conditions and the daily report. Rendering is
//! a pure function from template name + data to subject and bodies.

use eyre::{eyre, Result};
use handlebars::Handlebars;
use serde_json::Value;
use std::collections::HashMap;

/// Rendered template result
#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

/// Email template definition
#[derive(Clone, Debug)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

/// Handlebars-based template engine
///
/// Supports:
/// - Variables: `{{name}}`
/// - Conditionals: `{{#if condition}}...{{/if}}`
/// - Loops: `{{#each items}}...{{/each}}`
/// - HTML escaping: `{{{unescaped}}}` for raw HTML
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    templates: HashMap<String, EmailTemplate>,
}

impl TemplateEngine {
    /// Create a new TemplateEngine with the built-in alert templates
    pub fn new() -> Result<Self> {
        let mut engine = Self {
            handlebars: Handlebars::new(),
            templates: HashMap::new(),
        };

        engine.register_defaults()?;

        Ok(engine)
    }

    /// Register a template
    pub fn register(&mut self, template: EmailTemplate) -> Result<()> {
        self.handlebars
            .register_template_string(&format!("{}_subject", template.name), &template.subject)
            .map_err(|e| eyre!("Failed to register subject template: {}", e))?;

        if let Some(text) = &template.body_text {
            self.handlebars
                .register_template_string(&format!("{}_text", template.name), text)
                .map_err(|e| eyre!("Failed to register text template: {}", e))?;
        }

        if let Some(html) = &template.body_html {
            self.handlebars
                .register_template_string(&format!("{}_html", template.name), html)
                .map_err(|e| eyre!("Failed to register HTML template: {}", e))?;
        }

        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Render a template by name
    pub fn render(&self, name: &str, data: &Value) -> Result<RenderedTemplate> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| eyre!("Template not found: {}", name))?;

        let subject = self
            .handlebars
            .render(&format!("{}_subject", name), data)
            .map_err(|e| eyre!("Failed to render subject: {}", e))?;

        let body_text = if template.body_text.is_some() {
            Some(
                self.handlebars
                    .render(&format!("{}_text", name), data)
                    .map_err(|e| eyre!("Failed to render text: {}", e))?,
            )
        } else {
            None
        };

        let body_html = if template.body_html.is_some() {
            Some(
                self.handlebars
                    .render(&format!("{}_html", name), data)
                    .map_err(|e| eyre!("Failed to render HTML: {}", e))?,
            )
        } else {
            None
        };

        Ok(RenderedTemplate {
            subject,
            body_text,
            body_html,
        })
    }

    /// Check if a template exists
    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// List all registered templates
    pub fn list_templates(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    fn alert_html(headline: &str, body: &str, accent: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: {accent};">{headline}</h1>
    {body}
    <p style="color: #666; font-size: 13px;">Alert id: {{{{alert_id}}}} · Triggered at {{{{triggered_at}}}}</p>
</body>
</html>"#
        )
    }

    /// Register the built-in alert and report templates
    fn register_defaults(&mut self) -> Result<()> {
        self.register(EmailTemplate {
            name: "high_pollution".to_string(),
            subject: "High pollution in {{location}}: AQI {{aqi}}".to_string(),
            body_text: Some(
                r#"Air quality in {{location}} has degraded.

Current AQI: {{aqi}} ({{level}})
Main pollutant: {{pollutant}}

Sensitive groups should limit prolonged outdoor exertion."#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "High Pollution Warning",
                r#"<p>Air quality in <strong>{{location}}</strong> has degraded.</p>
    <p style="font-size: 28px; margin: 20px 0;"><strong>AQI {{aqi}}</strong> · {{level}}</p>
    <p>Main pollutant: {{pollutant}}</p>
    <p>Sensitive groups should limit prolonged outdoor exertion.</p>"#,
                "#d97706",
            )),
        })?;

        self.register(EmailTemplate {
            name: "extreme_pollution".to_string(),
            subject: "EXTREME pollution in {{location}}: AQI {{aqi}}".to_string(),
            body_text: Some(
                r#"Air quality in {{location}} has reached an extreme level.

Current AQI: {{aqi}} ({{level}})
Main pollutant: {{pollutant}}

Everyone should avoid outdoor activity until levels recover."#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Extreme Pollution Alert",
                r#"<p>Air quality in <strong>{{location}}</strong> has reached an extreme level.</p>
    <p style="font-size: 28px; margin: 20px 0; color: #dc2626;"><strong>AQI {{aqi}}</strong> · {{level}}</p>
    <p>Main pollutant: {{pollutant}}</p>
    <p><strong>Everyone should avoid outdoor activity until levels recover.</strong></p>"#,
                "#dc2626",
            )),
        })?;

        self.register(EmailTemplate {
            name: "api_failures".to_string(),
            subject: "Upstream provider failing: {{streak}} consecutive errors".to_string(),
            body_text: Some(
                r#"The air-quality provider has failed {{streak}} consecutive times.

The circuit breaker state is {{breaker_state}}. Data ingestion is degraded
until the provider recovers."#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Upstream Provider Failing",
                r#"<p>The air-quality provider has failed <strong>{{streak}}</strong> consecutive times.</p>
    <p>Circuit breaker state: <strong>{{breaker_state}}</strong></p>
    <p>Data ingestion is degraded until the provider recovers.</p>"#,
                "#dc2626",
            )),
        })?;

        self.register(EmailTemplate {
            name: "queue_backlog".to_string(),
            subject: "Queue backlog on {{queue}}: {{waiting}} waiting jobs".to_string(),
            body_text: Some(
                r#"The {{queue}} queue has {{waiting}} jobs waiting.

Processing is falling behind; check worker health and recent failures."#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Queue Backlog",
                r#"<p>The <strong>{{queue}}</strong> queue has <strong>{{waiting}}</strong> jobs waiting.</p>
    <p>Processing is falling behind; check worker health and recent failures.</p>"#,
                "#d97706",
            )),
        })?;

        self.register(EmailTemplate {
            name: "system_error".to_string(),
            subject: "Elevated error rate on {{queue}}".to_string(),
            body_text: Some(
                r#"Job failures on {{queue}} have crossed the error-rate threshold.

Failure rate: {{rate}}
{{#if last_error}}Most recent error: {{last_error}}{{/if}}"#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Elevated Error Rate",
                r#"<p>Job failures on <strong>{{queue}}</strong> have crossed the error-rate threshold.</p>
    <p>Failure rate: <strong>{{rate}}</strong></p>
    {{#if last_error}}<p>Most recent error: <code>{{last_error}}</code></p>{{/if}}"#,
                "#dc2626",
            )),
        })?;

        self.register(EmailTemplate {
            name: "storage_usage".to_string(),
            subject: "Storage usage at {{usage_pct}}%".to_string(),
            body_text: Some(
                r#"Storage usage has reached {{usage_pct}}% of capacity.

Verify the tier migration jobs are running and consider expanding capacity."#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Storage Usage Warning",
                r#"<p>Storage usage has reached <strong>{{usage_pct}}%</strong> of capacity.</p>
    <p>Verify the tier migration jobs are running and consider expanding capacity.</p>"#,
                "#d97706",
            )),
        })?;

        self.register(EmailTemplate {
            name: "daily_report".to_string(),
            subject: "Air quality report for {{location}}, {{date}}".to_string(),
            body_text: Some(
                r#"Daily air quality summary for {{location}} on {{date}}.

Average AQI: {{avg_aqi}} ({{level}})
Peak: {{max_aqi}} · Low: {{min_aqi}}
Dominant pollutant: {{pollutant}}
Unhealthy hours: {{unhealthy_hours}}"#
                    .to_string(),
            ),
            body_html: Some(Self::alert_html(
                "Daily Air Quality Report",
                r#"<p>Summary for <strong>{{location}}</strong> on {{date}}.</p>
    <p style="font-size: 28px; margin: 20px 0;"><strong>AQI {{avg_aqi}}</strong> · {{level}}</p>
    <p>Peak: {{max_aqi}} · Low: {{min_aqi}}</p>
    <p>Dominant pollutant: {{pollutant}}</p>
    <p>Unhealthy hours: {{unhealthy_hours}}</p>"#,
                "#2563eb",
            )),
        })?;

        Ok(())
    }
}
