//! OData collection paging.

use std::future::Future;
use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tenantops_core::fetch::{Continuation, FetchPage, PageSource};

use crate::ReqwestClient;

/// One page of an OData collection response.
///
/// Only the fields paging needs are modelled; `@odata.context`,
/// `@odata.count` and delta links are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataPage<T> {
    /// Records of this page.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Absolute URL of the next page, absent on the last page.
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

impl<T> ODataPage<T> {
    /// Converts the envelope into a core page.
    pub fn into_page(self) -> FetchPage<T> {
        FetchPage {
            items: self.value,
            continuation: self.next_link.map(Continuation::new),
        }
    }
}

/// [`PageSource`] over an OData collection such as `users` or `groups`.
///
/// Created with [`ReqwestClient::collection`].
#[derive(Debug, Clone)]
pub struct ODataCollection<T> {
    client: ReqwestClient,
    path: String,
    marker: PhantomData<fn() -> T>,
}

impl<T> ODataCollection<T> {
    pub(crate) fn new(client: ReqwestClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            marker: PhantomData,
        }
    }

    /// Path of the collection relative to the API root.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<T> PageSource for ODataCollection<T>
where
    T: DeserializeOwned + Send,
{
    type Item = T;

    fn fetch_page(
        &mut self,
        continuation: Option<Continuation>,
    ) -> impl Future<Output = tenantops_core::Result<FetchPage<T>>> + Send {
        self.client.get_page(&self.path, continuation)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct User {
        id: String,
        user_principal_name: String,
    }

    #[test]
    fn test_page_with_next_link() {
        let body = json!({
            "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#users",
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/users?$skiptoken=X1",
            "value": [
                { "id": "1", "userPrincipalName": "adele@contoso.com" },
                { "id": "2", "userPrincipalName": "alex@contoso.com" }
            ]
        });

        let page: ODataPage<User> = serde_json::from_value(body).unwrap();
        let page = page.into_page();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].user_principal_name, "alex@contoso.com");
        assert_eq!(
            page.continuation.unwrap().as_str(),
            "https://graph.microsoft.com/v1.0/users?$skiptoken=X1"
        );
    }

    #[test]
    fn test_last_page_without_value() {
        let page: ODataPage<User> = serde_json::from_value(json!({})).unwrap();
        let page = page.into_page();
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }
}
