use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::models::{Page, QueueItem};
use crate::settings::SETTINGS;
use crate::subscription::SubscriptionParams;

/// Read side of the content catalog: paged listings for the queue, single
/// lookups for seeding. Implementations must not cache `has_more` decisions;
/// the queue takes pagination truth from each `Page` as returned.
pub trait ItemSource: Send + Sync {
    fn fetch_page(
        &self,
        filters: Option<&SubscriptionParams>,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'_, Result<Page, FeedError>>;

    /// `Ok(None)` means the item does not exist; transport problems are `Err`.
    fn fetch_item(&self, id: &str) -> BoxFuture<'_, Result<Option<QueueItem>, FeedError>>;
}

/// REST-backed catalog. The auth token is injected at construction rather
/// than read from ambient state.
pub struct HttpCatalog {
    client: Arc<Client>,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, custom_client: Option<Arc<Client>>) -> Self {
        let client = custom_client.unwrap_or_else(|| {
            Arc::new(
                Client::builder()
                    .timeout(SETTINGS.request_timeout)
                    .connect_timeout(SETTINGS.request_timeout)
                    .build()
                    .expect("default reqwest client"),
            )
        });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

impl ItemSource for HttpCatalog {
    fn fetch_page(
        &self,
        filters: Option<&SubscriptionParams>,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'_, Result<Page, FeedError>> {
        let mut query: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
        ];
        if let Some(filters) = filters {
            query.extend(filters.form_fields());
        }

        async move {
            debug!(page, page_size, "fetching catalog page");
            let response = self
                .request(format!("{}/items", self.base_url))
                .query(&query)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body_text = response.text().await.unwrap_or_default();
                warn!(%status, "catalog page fetch failed");
                return Err(FeedError::InvalidResponse(format!(
                    "page fetch failed: {status}: {body_text}"
                )));
            }

            let page = response.json::<Page>().await?;
            debug!(items = page.items.len(), has_more = page.has_more, "catalog page fetched");
            Ok(page)
        }
        .boxed()
    }

    fn fetch_item(&self, id: &str) -> BoxFuture<'_, Result<Option<QueueItem>, FeedError>> {
        let url = format!("{}/items/{}", self.base_url, id);
        async move {
            debug!(%url, "fetching single item");
            let response = self.request(url).send().await?;

            match response.status().as_u16() {
                404 => Ok(None),
                status if !response.status().is_success() => {
                    let body_text = response.text().await.unwrap_or_default();
                    Err(FeedError::InvalidResponse(format!(
                        "item fetch failed: {status}: {body_text}"
                    )))
                }
                _ => Ok(Some(response.json::<QueueItem>().await?)),
            }
        }
        .boxed()
    }
}
