//! Read-only professor endpoints.

use crate::api::client::{ApiClient, Call};
use crate::api::errors::Result;
use crate::api::pagination::{ListEndpoint, Page, fetch_page};
use crate::domain::{
    Faculty, ModuleComparison, ModuleListing, Professor, ProfessorId, ProfessorListing,
    ProfessorSummary,
};

pub async fn professor_detail(client: &ApiClient, id: ProfessorId) -> Result<Professor> {
    client.json(Call::get(format!("/professors/{id}"))).await
}

pub async fn review_summary(client: &ApiClient, id: ProfessorId) -> Result<ProfessorSummary> {
    client
        .json(Call::get(format!("/professors/{id}/review_summary")))
        .await
}

pub fn search_endpoint(query: &str) -> ListEndpoint {
    let endpoint = ListEndpoint::new("/professors/search");
    let query = query.trim();
    if query.is_empty() {
        endpoint
    } else {
        endpoint.query("q", query)
    }
}

pub fn top_endpoint() -> ListEndpoint {
    ListEndpoint::new("/professors/top").size_param("n")
}

pub async fn search_professors(
    client: &ApiClient,
    query: &str,
    page: u32,
) -> Result<Page<ProfessorListing>> {
    fetch_page(client, &search_endpoint(query), page, client.page_size()).await
}

pub async fn top_professors(client: &ApiClient, page: u32) -> Result<Page<ProfessorListing>> {
    fetch_page(client, &top_endpoint(), page, client.page_size()).await
}

pub async fn faculties(client: &ApiClient) -> Result<Vec<Faculty>> {
    client.json(Call::get("/professors/faculties")).await
}

pub async fn modules(client: &ApiClient) -> Result<Vec<ModuleListing>> {
    client.json(Call::get("/professors/modules")).await
}

pub async fn compare_module(client: &ApiClient, module_code: &str) -> Result<ModuleComparison> {
    client
        .json(Call::get(format!(
            "/professors/modules/{}/compare",
            urlencoding::encode(module_code)
        )))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ScriptedTransport, scripted_client};
    use crate::session::store::Session;
    use reqwest::Method;
    use serde_json::json;

    #[tokio::test]
    async fn blank_search_omits_query_parameter() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/professors/search",
            200,
            json!({"results": [{"id": 1, "name": "Ada"}], "next": null}),
        );
        let (client, _) = scripted_client(&transport, Session::empty());

        let page = search_professors(&client, "   ", 1).await.expect("search");

        assert_eq!(page.items[0].name, "Ada");
        assert_eq!(transport.requests()[0].query_value("q"), None);
    }

    #[tokio::test]
    async fn module_code_is_encoded_in_compare_path() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/professors/modules/CS%2F2030%3F/compare",
            200,
            json!({"module_code": "CS/2030?", "semesters": {}}),
        );
        let (client, _) = scripted_client(&transport, Session::empty());

        compare_module(&client, "CS/2030?").await.expect("comparison");

        assert_eq!(
            transport.requests()[0].path,
            "/professors/modules/CS%2F2030%3F/compare"
        );
    }

    #[tokio::test]
    async fn faculties_decode_departments() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/professors/faculties",
            200,
            json!([{"name": "Computing", "departments": [{"name": "Computer Science"}]}]),
        );
        let (client, _) = scripted_client(&transport, Session::empty());

        let faculties = faculties(&client).await.expect("faculties");

        assert_eq!(faculties[0].departments[0].name, "Computer Science");
    }
}
