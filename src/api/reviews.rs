//! Review and reply endpoints.

use crate::api::client::{ApiClient, Call};
use crate::api::errors::Result;
use crate::api::pagination::{ListEndpoint, Page, fetch_page};
use crate::domain::{LikeState, ProfessorId, Rating, Reply, ReplyId, Review, ReviewId};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Fields for a new review.
#[derive(Debug, Clone, Serialize)]
pub struct NewReview {
    pub prof_id: ProfessorId,
    pub module_code: String,
    pub text: String,
    pub rating: Rating,
}

/// Changed fields of an existing review. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl ReviewEdit {
    pub fn is_empty(&self) -> bool {
        self.module_code.is_none() && self.text.is_none() && self.rating.is_none()
    }
}

/// Server echo of an edited review.
#[derive(Debug, Clone, Deserialize)]
pub struct EditedReview {
    #[serde(default)]
    pub module_code: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rating: Option<Rating>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditedReply {
    pub text: String,
}

pub fn professor_reviews_endpoint(prof_id: ProfessorId) -> ListEndpoint {
    ListEndpoint::new(format!("/reviews/professors/{prof_id}")).authenticated()
}

pub fn replies_endpoint(review_id: ReviewId) -> ListEndpoint {
    ListEndpoint::new(format!("/reviews/{review_id}/replies")).authenticated()
}

/// Reviews by `username`, or by the signed-in user when `None`.
pub fn user_reviews_endpoint(username: Option<&str>) -> ListEndpoint {
    match username {
        Some(name) => {
            ListEndpoint::new(format!("/reviews/users/{}", urlencoding::encode(name)))
                .authenticated()
        }
        None => ListEndpoint::new("/reviews/users/").authenticated(),
    }
}

pub async fn professor_reviews(
    client: &ApiClient,
    prof_id: ProfessorId,
    page: u32,
) -> Result<Page<Review>> {
    fetch_page(
        client,
        &professor_reviews_endpoint(prof_id),
        page,
        client.page_size(),
    )
    .await
}

pub async fn review_replies(
    client: &ApiClient,
    review_id: ReviewId,
    page: u32,
) -> Result<Page<Reply>> {
    let page: Page<Reply> =
        fetch_page(client, &replies_endpoint(review_id), page, client.page_size()).await?;

    Ok(Page {
        items: page
            .items
            .into_iter()
            .map(|reply| {
                let reply = Reply { review_id, ..reply };
                reply.with_derived_mention()
            })
            .collect(),
        has_next: page.has_next,
    })
}

pub async fn user_reviews(
    client: &ApiClient,
    username: Option<&str>,
    page: u32,
) -> Result<Page<Review>> {
    fetch_page(
        client,
        &user_reviews_endpoint(username),
        page,
        client.page_size(),
    )
    .await
}

pub async fn create_review(client: &ApiClient, review: &NewReview) -> Result<Review> {
    client
        .json(
            Call::post("/reviews/create")
                .json(json!(review))
                .authenticated(),
        )
        .await
}

pub async fn edit_review(client: &ApiClient, id: ReviewId, edit: &ReviewEdit) -> Result<EditedReview> {
    client
        .json(
            Call::patch(format!("/reviews/{id}/edit"))
                .json(json!(edit))
                .authenticated(),
        )
        .await
}

pub async fn delete_review(client: &ApiClient, id: ReviewId) -> Result<()> {
    client
        .empty(Call::delete(format!("/reviews/{id}/delete")).authenticated())
        .await
}

pub async fn like_review(client: &ApiClient, id: ReviewId) -> Result<LikeState> {
    client
        .json(Call::post(format!("/reviews/{id}/like")).authenticated())
        .await
}

pub async fn create_reply(client: &ApiClient, review_id: ReviewId, text: &str) -> Result<()> {
    client
        .empty(
            Call::post(format!("/reviews/{review_id}/reply"))
                .json(json!({ "review_id": review_id, "text": text }))
                .authenticated(),
        )
        .await
}

pub async fn edit_reply(client: &ApiClient, id: ReplyId, text: &str) -> Result<EditedReply> {
    client
        .json(
            Call::put(format!("/reviews/reply/{id}/edit"))
                .json(json!({ "text": text }))
                .authenticated(),
        )
        .await
}

pub async fn delete_reply(client: &ApiClient, id: ReplyId) -> Result<()> {
    client
        .empty(Call::delete(format!("/reviews/reply/{id}/delete")).authenticated())
        .await
}

pub async fn like_reply(client: &ApiClient, id: ReplyId) -> Result<LikeState> {
    client
        .json(Call::post(format!("/reviews/reply/{id}/like")).authenticated())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ScriptedTransport, scripted_client};
    use crate::session::store::Session;
    use reqwest::Method;

    #[tokio::test]
    async fn replies_are_tagged_with_review_and_mention() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/reviews/5/replies",
            200,
            json!({"results": [{"id": 1, "username": "bob", "text": "@alice agreed"}], "next": null}),
        );
        let (client, _) = scripted_client(&transport, Session::empty());

        let page = review_replies(&client, 5, 1).await.expect("replies");

        assert_eq!(page.items[0].review_id, 5);
        assert_eq!(page.items[0].addressed_to.as_deref(), Some("alice"));
    }

    #[test]
    fn username_is_a_single_path_segment() {
        let endpoint = user_reviews_endpoint(Some("al/ice?x#y"));
        assert_eq!(endpoint.path(), "/reviews/users/al%2Fice%3Fx%23y");

        assert_eq!(user_reviews_endpoint(None).path(), "/reviews/users/");
    }

    #[test]
    fn review_edit_serializes_changed_fields_only() {
        let edit = ReviewEdit {
            text: Some("updated".to_owned()),
            ..ReviewEdit::default()
        };

        assert_eq!(json!(edit), json!({"text": "updated"}));
    }
}
