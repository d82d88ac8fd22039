//! HTTP client for the remote story service.

use reqwest::multipart;
use std::time::Duration;
use url::Url;

use crate::api::types::{
  ApiEnvelope, LoginResponse, LoginResult, NewStory, Story, StoryDetailResponse,
  StoryListResponse,
};
use crate::error::{Error, Result};
use crate::session::SessionContext;

/// Story service client. Cheap to clone.
#[derive(Clone)]
pub struct StoryClient {
  http: reqwest::Client,
  base_url: Url,
  session: SessionContext,
}

impl StoryClient {
  pub fn new(base_url: Url, session: SessionContext, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::network(format!("failed to build http client: {e}")))?;
    Ok(Self {
      http,
      base_url,
      session,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| Error::network(format!("bad endpoint {path}: {e}")))
  }

  /// Turn a non-2xx response into `Error::Api`, extracting the server's
  /// message when the body carries one.
  async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let message = response
      .json::<ApiEnvelope>()
      .await
      .map(|envelope| envelope.message)
      .unwrap_or_else(|_| status.to_string());
    Err(Error::api(status.as_u16(), message))
  }

  fn bearer(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
    let token = self.session.require_token()?;
    Ok(request.bearer_auth(token))
  }

  /// `GET /stories?page,size,location`.
  pub async fn get_all_stories(
    &self,
    page: u32,
    size: u32,
    with_location: bool,
  ) -> Result<Vec<Story>> {
    let mut url = self.endpoint("stories")?;
    url
      .query_pairs_mut()
      .append_pair("page", &page.to_string())
      .append_pair("size", &size.to_string())
      .append_pair("location", if with_location { "1" } else { "0" });

    let request = self.bearer(self.http.get(url))?;
    let response = Self::check(request.send().await?).await?;
    let body: StoryListResponse = response
      .json()
      .await
      .map_err(|e| Error::network(format!("malformed story list: {e}")))?;
    if body.error {
      return Err(Error::api(200, body.message));
    }
    Ok(body.list_story)
  }

  /// `GET /stories/{id}`.
  pub async fn get_story_detail(&self, id: &str) -> Result<Story> {
    let url = self.endpoint(&format!("stories/{id}"))?;
    let request = self.bearer(self.http.get(url))?;
    let response = Self::check(request.send().await?).await?;
    let body: StoryDetailResponse = response
      .json()
      .await
      .map_err(|e| Error::network(format!("malformed story detail: {e}")))?;
    if body.error {
      return Err(Error::api(200, body.message));
    }
    Ok(body.story)
  }

  /// `POST /stories` (multipart: description, photo, lat, lon).
  pub async fn add_story(&self, story: &NewStory) -> Result<String> {
    let mut form = multipart::Form::new()
      .text("description", story.description.clone())
      .part(
        "photo",
        multipart::Part::bytes(story.photo.clone())
          .file_name(story.photo_name.clone())
          .mime_str("image/jpeg")
          .map_err(|e| Error::network(format!("bad photo part: {e}")))?,
      );
    if let Some(lat) = story.lat {
      form = form.text("lat", lat.to_string());
    }
    if let Some(lon) = story.lon {
      form = form.text("lon", lon.to_string());
    }

    let url = self.endpoint("stories")?;
    let request = self.bearer(self.http.post(url))?.multipart(form);
    let response = Self::check(request.send().await?).await?;
    let body: ApiEnvelope = response
      .json()
      .await
      .map_err(|e| Error::network(format!("malformed add-story response: {e}")))?;
    if body.error {
      return Err(Error::api(200, body.message));
    }
    Ok(body.message)
  }

  /// `POST /register`.
  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
    let url = self.endpoint("register")?;
    let response = self
      .http
      .post(url)
      .json(&serde_json::json!({
        "name": name,
        "email": email,
        "password": password,
      }))
      .send()
      .await?;
    let response = Self::check(response).await?;
    let body: ApiEnvelope = response
      .json()
      .await
      .map_err(|e| Error::network(format!("malformed register response: {e}")))?;
    if body.error {
      return Err(Error::api(200, body.message));
    }
    Ok(body.message)
  }

  /// `POST /login`. Stores the resulting token and user profile into the
  /// session context.
  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
    let url = self.endpoint("login")?;
    let response = self
      .http
      .post(url)
      .json(&serde_json::json!({
        "email": email,
        "password": password,
      }))
      .send()
      .await?;
    let response = Self::check(response).await?;
    let body: LoginResponse = response
      .json()
      .await
      .map_err(|e| Error::network(format!("malformed login response: {e}")))?;

    let result = match (body.error, body.login_result) {
      (false, Some(result)) => result,
      _ => return Err(Error::api(200, body.message)),
    };

    self.session.set(crate::session::Session {
      token: result.token.clone(),
      user_id: result.user_id.clone(),
      name: result.name.clone(),
      email: Some(email.to_string()),
    });
    Ok(result)
  }

  /// `POST /push` with the subscription record.
  pub async fn register_push_subscription(
    &self,
    endpoint: &str,
    p256dh: &str,
    auth: &str,
  ) -> Result<()> {
    let url = self.endpoint("push")?;
    let request = self.bearer(self.http.post(url))?.json(&serde_json::json!({
      "endpoint": endpoint,
      "p256dh": p256dh,
      "auth": auth,
    }));
    Self::check(request.send().await?).await?;
    Ok(())
  }

  /// `DELETE /push` for the given endpoint.
  pub async fn remove_push_subscription(&self, endpoint: &str) -> Result<()> {
    let url = self.endpoint("push")?;
    let request = self
      .bearer(self.http.delete(url))?
      .json(&serde_json::json!({ "endpoint": endpoint }));
    Self::check(request.send().await?).await?;
    Ok(())
  }
}
