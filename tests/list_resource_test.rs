mod common;

use common::{client, ScriptedTransport};
use reqwest::Method;
use serde_json::json;
use staffdesk::list::{FetchApplied, ListResource, LOAD_FAILED};
use staffdesk::model::{Department, User};

const DEPARTMENTS: &str = "api/departments/";
const USERS: &str = "api/users/";

fn query_of(call: &staffdesk::api::model::ApiRequest, key: &str) -> Option<String> {
    call.query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

#[tokio::test]
async fn paginated_single_result_is_one_page() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, DEPARTMENTS, 200, json!({ "results": [{ "id": 1, "name": "Sales" }], "count": 1 }))
        .await;
    let mut list = ListResource::<Department>::new(client(&transport), 20);

    assert_eq!(list.refresh().await, FetchApplied::Applied);
    assert_eq!(list.page().total_count, 1);
    assert_eq!(list.page().total_pages, 1);
    assert!(list.page().paginated);
    assert_eq!(list.items()[0].name, "Sales");
}

#[tokio::test]
async fn bare_array_is_one_page_of_everything() {
    let transport = ScriptedTransport::default();
    transport
        .reply(
            Method::GET,
            DEPARTMENTS,
            200,
            json!([{ "id": 1, "name": "Sales" }, { "id": 2, "name": "Support" }]),
        )
        .await;
    let mut list = ListResource::<Department>::new(client(&transport), 20);
    list.refresh().await;

    assert_eq!(list.page().total_count, 2);
    assert_eq!(list.page().total_pages, 1);
    assert!(!list.page().paginated);
}

#[tokio::test]
async fn server_count_drives_page_total() {
    let transport = ScriptedTransport::default();
    let rows: Vec<_> = (1..=20).map(|id| json!({ "id": id, "name": format!("D{id}") })).collect();
    transport
        .reply(Method::GET, DEPARTMENTS, 200, json!({ "results": rows, "count": 45 }))
        .await;
    let mut list = ListResource::<Department>::new(client(&transport), 20);
    list.refresh().await;

    assert_eq!(list.page().total_pages, 3);
    assert_eq!(list.page().showing_range(), Some((1, 20)));
}

#[tokio::test]
async fn filter_resets_page_and_page_keeps_filters() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, USERS, 200, json!({ "results": [], "count": 100 }))
        .await;
    let mut list = ListResource::<User>::new(client(&transport), 10);

    list.change_filter("role", Some("manager")).await;
    list.change_page(3).await;
    let calls = transport.calls().await;
    let last = calls.last().unwrap();
    assert_eq!(query_of(last, "page").as_deref(), Some("3"));
    assert_eq!(query_of(last, "role").as_deref(), Some("manager"));

    list.change_filter("department", Some("4")).await;
    let calls = transport.calls().await;
    let last = calls.last().unwrap();
    assert_eq!(query_of(last, "page").as_deref(), Some("1"));
    assert_eq!(query_of(last, "role").as_deref(), Some("manager"));
    assert_eq!(query_of(last, "department").as_deref(), Some("4"));

    list.change_search("ann").await;
    let calls = transport.calls().await;
    assert_eq!(query_of(calls.last().unwrap(), "search").as_deref(), Some("ann"));
    assert_eq!(list.query().page(), 1);
}

#[tokio::test]
async fn unchanged_query_does_not_refetch() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, USERS, 200, json!([]))
        .await;
    let mut list = ListResource::<User>::new(client(&transport), 10);

    assert_eq!(list.change_page(1).await, None);
    assert_eq!(list.change_filter("role", None).await, None);
    assert_eq!(list.change_search("  ").await, None);
    assert!(transport.calls().await.is_empty());
}

#[tokio::test]
async fn late_response_from_older_query_is_dropped() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, DEPARTMENTS, 200, json!([{ "id": 1, "name": "Old" }]))
        .await;
    transport
        .reply(Method::GET, DEPARTMENTS, 200, json!([{ "id": 2, "name": "New" }]))
        .await;
    let api = client(&transport);
    let mut list = ListResource::<Department>::new(api.clone(), 20);

    let first = list.begin_fetch();
    list.query_mut().set_search("new");
    let second = list.begin_fetch();
    let first_result = ListResource::<Department>::fetch(&api, &first.query).await;
    let second_result = ListResource::<Department>::fetch(&api, &second.query).await;

    assert_eq!(list.apply(&second, second_result), FetchApplied::Applied);
    assert_eq!(list.apply(&first, first_result), FetchApplied::Stale);
    assert_eq!(list.items().len(), 1);
    assert_eq!(list.items()[0].name, "New");
    assert!(!list.is_loading());
}

#[tokio::test]
async fn failed_reload_keeps_previous_items() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, DEPARTMENTS, 200, json!([{ "id": 1, "name": "Sales" }]))
        .await;
    transport
        .reply(Method::GET, DEPARTMENTS, 500, json!({ "detail": "Database unavailable" }))
        .await;
    let mut list = ListResource::<Department>::new(client(&transport), 20);

    list.refresh().await;
    assert_eq!(list.refresh().await, FetchApplied::Failed);
    assert_eq!(list.items().len(), 1);
    assert_eq!(list.error(), Some("Database unavailable"));
}

#[tokio::test]
async fn network_failure_uses_generic_message() {
    let transport = ScriptedTransport::default();
    transport
        .fail(Method::GET, DEPARTMENTS, "connection refused")
        .await;
    let mut list = ListResource::<Department>::new(client(&transport), 20);

    assert_eq!(list.refresh().await, FetchApplied::Failed);
    assert_eq!(list.error(), Some(LOAD_FAILED));
    assert!(list.items().is_empty());
}

#[tokio::test]
async fn requests_carry_token_and_language() {
    let transport = ScriptedTransport::default();
    transport.reply(Method::GET, USERS, 200, json!([])).await;
    let mut list = ListResource::<User>::new(client(&transport), 10);
    list.refresh().await;

    let calls = transport.calls().await;
    assert_eq!(calls[0].header("Authorization"), Some("Token test-token"));
    assert_eq!(calls[0].header("X-Language"), Some("ru"));
    assert_eq!(query_of(&calls[0], "page_size").as_deref(), Some("10"));
}
