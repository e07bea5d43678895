use std::collections::HashMap;

use anyhow::Result;
use notification_relay::clients::TemplateResolver;
use notification_relay::clients::template::HttpTemplateResolver;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn welcome_template() -> serde_json::Value {
    json!({
        "id": "welcome",
        "locale": "en",
        "subject": "Welcome, {{name}}!",
        "body_html": "<p>Hello {{name}}, your plan is {{plan}}.</p>",
        "body_text": "Hello {{name}}, your plan is {{plan}}.",
        "variables": ["name", "plan"]
    })
}

/// Test: the resolver fetches the template for the requested locale and
/// substitutes every variable into the subject and both bodies.
#[tokio::test]
async fn test_render_fetches_and_substitutes() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/templates/welcome"))
        .and(query_param("locale", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(welcome_template()))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = HttpTemplateResolver::with_base_url(server.uri())?;

    let mut variables = HashMap::new();
    variables.insert("name".to_string(), "Ada".to_string());
    variables.insert("plan".to_string(), "pro".to_string());

    let rendered = resolver.render("welcome", "en", &variables).await?;

    assert_eq!(rendered.subject.as_deref(), Some("Welcome, Ada!"));
    assert_eq!(rendered.body_html, "<p>Hello Ada, your plan is pro.</p>");
    assert_eq!(rendered.body_text, "Hello Ada, your plan is pro.");

    Ok(())
}

/// Test: a template without a subject line renders with no subject, which is
/// how push templates arrive.
#[tokio::test]
async fn test_render_without_subject() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/templates/push-alert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "push-alert",
            "locale": "en",
            "subject": null,
            "body_html": "<p>{{event}}</p>",
            "body_text": "{{event}}",
            "variables": ["event"]
        })))
        .mount(&server)
        .await;

    let resolver = HttpTemplateResolver::with_base_url(server.uri())?;
    let mut variables = HashMap::new();
    variables.insert("event".to_string(), "Deploy finished".to_string());

    let rendered = resolver.render("push-alert", "en", &variables).await?;
    assert_eq!(rendered.subject, None);
    assert_eq!(rendered.body_text, "Deploy finished");

    Ok(())
}

/// Test: rendering fails when the request leaves a template variable
/// unsubstituted, and the error names the missing placeholder.
#[tokio::test]
async fn test_render_fails_on_missing_variable() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/templates/welcome"))
        .respond_with(ResponseTemplate::new(200).set_body_json(welcome_template()))
        .mount(&server)
        .await;

    let resolver = HttpTemplateResolver::with_base_url(server.uri())?;
    let mut variables = HashMap::new();
    variables.insert("name".to_string(), "Ada".to_string());
    // "plan" deliberately missing.

    let error = resolver
        .render("welcome", "en", &variables)
        .await
        .expect_err("Render should fail with a variable missing");
    assert!(
        error.to_string().contains("{{plan}}"),
        "Error should name the missing placeholder: {error}"
    );

    Ok(())
}

/// Test: an unknown template id surfaces as an error.
#[tokio::test]
async fn test_render_fails_on_unknown_template() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = HttpTemplateResolver::with_base_url(server.uri())?;
    let result = resolver.render("missing", "en", &HashMap::new()).await;

    assert!(result.is_err(), "404 from the template service should fail");

    Ok(())
}

/// Test: a template service outage surfaces as an error; the worker treats
/// it as transient and retries.
#[tokio::test]
async fn test_render_fails_on_service_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = HttpTemplateResolver::with_base_url(server.uri())?;
    let result = resolver.render("welcome", "en", &HashMap::new()).await;

    assert!(result.is_err());

    Ok(())
}
