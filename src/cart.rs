use std::time::Duration;

use clap::ValueEnum;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::token;

/// htmx retarget header; set when the whole cart container must be
/// re-rendered instead of a single quantity widget.
pub const RETARGET_HEADER: &str = "hx-retarget";
pub const CART_CONTAINER: &str = "#cart-content";
pub const EMPTY_CART_MARKER: &str = "Your cart is empty";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// `Cookie: jwt_token=<token>`
    Cookie,
    /// `Authorization: Bearer <token>`
    Bearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CartOp {
    Add,
    Remove,
    Increase,
    Decrease,
    View,
}

impl CartOp {
    pub fn method(self) -> Method {
        match self {
            CartOp::Add | CartOp::Increase | CartOp::Decrease => Method::POST,
            CartOp::Remove => Method::DELETE,
            CartOp::View => Method::GET,
        }
    }

    pub fn path(self, item: u32) -> String {
        match self {
            CartOp::Add => format!("/api/cart/add/{item}"),
            CartOp::Remove => format!("/api/cart/remove/{item}"),
            CartOp::Increase => format!("/api/cart/increase-quantity/{item}"),
            CartOp::Decrease => format!("/api/cart/decrease-quantity/{item}"),
            CartOp::View => "/api/cart".to_string(),
        }
    }

    /// Whether `outcome` is inside this operation's accepted set.
    ///
    /// `remove` tolerates 400 (the item may never have been added).
    /// `decrease` does not: rejecting a decrease of an absent item is the
    /// one server-side logical error the driver distinguishes. A decrease
    /// that empties the slot returns a cart fragment instead of a number
    /// and must retarget the cart container.
    pub fn accepts(self, outcome: &OpOutcome) -> bool {
        match self {
            CartOp::Add | CartOp::View => outcome.status == StatusCode::OK,
            CartOp::Remove => {
                outcome.status == StatusCode::OK || outcome.status == StatusCode::BAD_REQUEST
            }
            CartOp::Increase => outcome.status == StatusCode::OK && outcome.quantity().is_some(),
            CartOp::Decrease => {
                outcome.status == StatusCode::OK
                    && (outcome.quantity().is_some() || outcome.retargets_container())
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CartError {
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
}

/// What one operation produced: status, any rotated credential, the raw
/// body, and the retarget hint when the response re-renders the cart.
#[derive(Debug)]
pub struct OpOutcome {
    pub status: StatusCode,
    pub rotated: Option<String>,
    pub body: String,
    pub retarget: Option<String>,
}

impl OpOutcome {
    /// The new quantity, when the body is the bare decimal that
    /// increase/decrease return on a plain quantity change.
    pub fn quantity(&self) -> Option<u32> {
        self.body.trim().parse().ok()
    }

    pub fn retargets_container(&self) -> bool {
        self.retarget.as_deref() == Some(CART_CONTAINER)
    }

    pub fn is_empty_cart(&self) -> bool {
        self.body.contains(EMPTY_CART_MARKER)
    }
}

pub struct CartClient {
    http: Client,
    base: String,
    auth: AuthMode,
}

impl CartClient {
    pub fn new(base_url: &str, auth: AuthMode, timeout: Duration) -> Result<Self, CartError> {
        let parsed = Url::parse(base_url)?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: parsed.as_str().trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Issues one cart operation with the given credential. Always
    /// attempts rotation extraction so the caller can update its session
    /// before the next, causally dependent, call.
    pub async fn execute(
        &self,
        op: CartOp,
        item: u32,
        token: &str,
    ) -> Result<OpOutcome, CartError> {
        let url = format!("{}{}", self.base, op.path(item));
        let request = self
            .http
            .request(op.method(), &url)
            .header(CONTENT_TYPE, "application/json");
        let request = match self.auth {
            AuthMode::Cookie => {
                request.header(COOKIE, format!("{}={token}", token::COOKIE_NAME))
            }
            AuthMode::Bearer => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        let rotated = token::extract_rotated(response.headers());
        let retarget = response
            .headers()
            .get(RETARGET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(OpOutcome {
            status,
            rotated,
            body,
            retarget,
        })
    }

    /// Unauthenticated first request; the target seeds the session cookie
    /// on it, which becomes the VU's initial credential.
    pub async fn bootstrap(&self, path: &str) -> Result<Option<String>, CartError> {
        let url = format!("{}{}", self.base, path);
        let response = self.http.get(&url).send().await?;
        Ok(token::extract_rotated(response.headers()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: StatusCode, body: &str, retarget: Option<&str>) -> OpOutcome {
        OpOutcome {
            status,
            rotated: None,
            body: body.to_string(),
            retarget: retarget.map(str::to_string),
        }
    }

    #[test]
    fn methods_and_paths() {
        assert_eq!(CartOp::Add.method(), Method::POST);
        assert_eq!(CartOp::Remove.method(), Method::DELETE);
        assert_eq!(CartOp::Increase.method(), Method::POST);
        assert_eq!(CartOp::Decrease.method(), Method::POST);
        assert_eq!(CartOp::View.method(), Method::GET);

        assert_eq!(CartOp::Add.path(3), "/api/cart/add/3");
        assert_eq!(CartOp::Remove.path(0), "/api/cart/remove/0");
        assert_eq!(CartOp::Increase.path(7), "/api/cart/increase-quantity/7");
        assert_eq!(CartOp::Decrease.path(1), "/api/cart/decrease-quantity/1");
        assert_eq!(CartOp::View.path(5), "/api/cart");
    }

    #[test]
    fn add_accepts_only_ok() {
        assert!(CartOp::Add.accepts(&outcome(StatusCode::OK, "Added", None)));
        assert!(!CartOp::Add.accepts(&outcome(StatusCode::BAD_REQUEST, "", None)));
        assert!(!CartOp::Add.accepts(&outcome(StatusCode::INTERNAL_SERVER_ERROR, "", None)));
    }

    #[test]
    fn remove_tolerates_absent_items() {
        assert!(CartOp::Remove.accepts(&outcome(StatusCode::OK, "<ul></ul>", None)));
        assert!(CartOp::Remove.accepts(&outcome(StatusCode::BAD_REQUEST, "Item not in cart", None)));
        assert!(!CartOp::Remove.accepts(&outcome(StatusCode::INTERNAL_SERVER_ERROR, "", None)));
    }

    #[test]
    fn increase_requires_a_numeric_body() {
        assert!(CartOp::Increase.accepts(&outcome(StatusCode::OK, "2", None)));
        assert!(CartOp::Increase.accepts(&outcome(StatusCode::OK, " 13\n", None)));
        assert!(!CartOp::Increase.accepts(&outcome(StatusCode::OK, "<div>cart</div>", None)));
        assert!(!CartOp::Increase.accepts(&outcome(StatusCode::BAD_REQUEST, "2", None)));
    }

    #[test]
    fn decrease_accepts_quantity_or_container_refresh() {
        assert!(CartOp::Decrease.accepts(&outcome(StatusCode::OK, "1", None)));
        assert!(CartOp::Decrease.accepts(&outcome(
            StatusCode::OK,
            "<ul><li>Bananas x 2</li></ul>",
            Some(CART_CONTAINER),
        )));
        // A fragment body without the retarget hint is a malformed reply.
        assert!(!CartOp::Decrease.accepts(&outcome(StatusCode::OK, "<ul></ul>", None)));
        // Absent item: the strict logical-error case.
        assert!(!CartOp::Decrease.accepts(&outcome(StatusCode::BAD_REQUEST, "", None)));
    }

    #[test]
    fn view_accepts_ok() {
        let reply = outcome(StatusCode::OK, EMPTY_CART_MARKER, None);
        assert!(CartOp::View.accepts(&reply));
        assert!(reply.is_empty_cart());
        assert!(!CartOp::View.accepts(&outcome(StatusCode::NOT_FOUND, "", None)));
    }

    #[test]
    fn retarget_must_name_the_cart_container() {
        assert!(outcome(StatusCode::OK, "", Some("#cart-content")).retargets_container());
        assert!(!outcome(StatusCode::OK, "", Some("#item-qty-3")).retargets_container());
        assert!(!outcome(StatusCode::OK, "", None).retargets_container());
    }

    #[test]
    fn client_rejects_a_malformed_base_url() {
        assert!(matches!(
            CartClient::new("not a url", AuthMode::Cookie, Duration::from_secs(1)),
            Err(CartError::BaseUrl(_))
        ));
    }
}
