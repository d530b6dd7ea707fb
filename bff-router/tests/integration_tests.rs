use std::sync::Arc;

use bff_router::Configuration;
use bff_router::FetchOptions;
use bff_router::FetchStat;
use bff_router::FieldDefinition;
use bff_router::GraphResolver;
use bff_router::GraphSpec;
use bff_router::HookError;
use parking_lot::Mutex;
use serde_json::json;
use test_log::test;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

async fn resolver(mock_server: &MockServer) -> GraphResolver {
    let configuration: Configuration = format!(
        r#"
services:
  movies:
    protocol: http
    address: {}
resolver:
  skip_null: true
http:
  timeout: 5s
"#,
        mock_server.uri()
    )
    .parse()
    .unwrap();
    GraphResolver::from_configuration(&configuration).unwrap()
}

#[test(tokio::test)]
async fn it_composes_dependent_backend_calls() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movies/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "title": "Metropolis",
            "director": 7,
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .and(query_param("id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Fritz Lang" })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ratings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let graph = GraphSpec::new()
        .field(
            "#movie",
            FieldDefinition::new().prefilter(|context| async move {
                let id = context.request()["movie"].as_u64().unwrap_or_default();
                Ok::<_, HookError>(FetchOptions::new("movies", format!("/movies/{id}")))
            }),
        )
        .field(
            "title",
            FieldDefinition::new().fake(|context| async move {
                Ok::<_, HookError>(context.get("movie")?["title"].clone())
            }),
        )
        .field(
            "director",
            FieldDefinition::new()
                .prefilter(|context| async move {
                    let mut options = FetchOptions::new("movies", "/people");
                    options.data = Some(json!({ "id": context.get("movie")?["director"] }));
                    Ok::<_, HookError>(options)
                })
                .convert(|context| async move {
                    Ok::<_, HookError>(context.get("director")?["name"].clone())
                }),
        )
        .field(
            "rating",
            FieldDefinition::fetch(FetchOptions {
                method: http::Method::POST,
                ..FetchOptions::new("movies", "/ratings")
            })
            .fallback(|_, _| async { Ok::<_, HookError>(serde_json::Value::Null) }),
        );

    let resolver = resolver(&mock_server).await;
    let stats = Arc::new(Mutex::new(Vec::<FetchStat>::new()));
    let sink = stats.clone();
    let options = resolver
        .options()
        .with_request(json!({ "movie": 42 }))
        .with_on_stat(move |fetches| sink.lock().extend_from_slice(fetches));

    let output = resolver.resolve(&graph, options).await.unwrap();

    assert_eq!(
        serde_json::Value::Object(output),
        json!({ "title": "Metropolis", "director": "Fritz Lang" })
    );
    let stats = stats.lock();
    assert_eq!(stats.len(), 3);
    assert_eq!(
        stats
            .iter()
            .filter(|stat| stat.error.is_some())
            .map(|stat| stat.request.url.clone())
            .collect::<Vec<_>>(),
        vec![format!("{}/ratings", mock_server.uri())]
    );
}

#[test(tokio::test)]
async fn it_reports_backend_errors_with_their_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let resolver = resolver(&mock_server).await;
    let graph = GraphSpec::new().field(
        "movie",
        FieldDefinition::fetch(FetchOptions::new("movies", "/movies/1")),
    );

    let err = resolver
        .resolve(&graph, resolver.options())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(502));
    assert!(err.is_recoverable());
}

#[test]
fn it_generates_a_configuration_schema() {
    let schema = serde_json::to_value(Configuration::schema()).unwrap();
    assert!(schema["properties"]["services"].is_object());
}
