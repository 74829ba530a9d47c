//! Reusable warp filters: shared state, client identity and request guards

use log::warn;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use warp::http::HeaderMap;
use warp::{Filter, Rejection};

use crate::constants::ADMIN_TOKEN_HEADER;
use crate::core::ip_extractor::{extract_client_ip, IpExtractionConfig};
use crate::core::rate_limiter::RateLimiter;
use crate::core::server::BoardServer;
use crate::error::{MurmurError, Result};
use crate::security::constant_time_eq;

/// Rejection raised when a client runs out of tokens
#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

impl warp::reject::Reject for RateLimitExceeded {}

// Helper function to include the board in request
pub fn with_board(
    board: Arc<BoardServer>,
) -> impl Filter<Extract = (Arc<BoardServer>,), Error = Infallible> + Clone {
    warp::any().map(move || board.clone())
}

/// Resolve the client IP used as rate-limit identity
pub fn client_ip(
    config: IpExtractionConfig,
) -> impl Filter<Extract = (IpAddr,), Error = Infallible> + Clone {
    warp::header::headers_cloned()
        .and(warp::addr::remote())
        .map(move |headers: HeaderMap, remote: Option<SocketAddr>| {
            extract_client_ip(&headers, remote, &config)
        })
}

/// Take one token from `limiter` for the calling client or reject
pub fn rate_limited(
    limiter: Arc<RateLimiter>,
    config: IpExtractionConfig,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    client_ip(config)
        .and_then(move |ip: IpAddr| {
            let limiter = limiter.clone();
            async move {
                if limiter.allow(&ip.to_string()).await {
                    Ok(())
                } else {
                    warn!("Rate limit exceeded for {}", ip);
                    Err(warp::reject::custom(RateLimitExceeded {
                        retry_after: limiter.refill_interval(),
                    }))
                }
            }
        })
        .untuple_one()
}

/// Require the admin token header
pub fn admin_only(expected: Arc<str>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>(ADMIN_TOKEN_HEADER)
        .and_then(move |supplied: Option<String>| {
            let expected = expected.clone();
            async move {
                check_admin_token(supplied.as_deref(), &expected).map_err(|e| {
                    warn!("Rejected admin request: {}", e);
                    warp::reject::custom(e)
                })
            }
        })
        .untuple_one()
}

/// Missing or empty token is `Unauthorized`, a wrong one `Forbidden`
pub fn check_admin_token(supplied: Option<&str>, expected: &str) -> Result<()> {
    match supplied {
        None | Some("") => Err(MurmurError::Unauthorized),
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        Some(_) => Err(MurmurError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    #[test]
    fn test_check_admin_token() {
        let expected = "correct-horse-battery";
        assert!(matches!(
            check_admin_token(None, expected),
            Err(MurmurError::Unauthorized)
        ));
        assert!(matches!(
            check_admin_token(Some(""), expected),
            Err(MurmurError::Unauthorized)
        ));
        assert!(matches!(
            check_admin_token(Some("wrong"), expected),
            Err(MurmurError::Forbidden)
        ));
        assert!(check_admin_token(Some(expected), expected).is_ok());
    }

    #[tokio::test]
    async fn test_admin_filter() {
        let filter = admin_only(Arc::from("s3cret-token-value"));

        assert!(warp::test::request()
            .header("x-admin-token", "s3cret-token-value")
            .filter(&filter)
            .await
            .is_ok());

        let rejection = warp::test::request()
            .header("x-admin-token", "nope")
            .filter(&filter)
            .await
            .unwrap_err();
        assert!(matches!(
            rejection.find::<MurmurError>(),
            Some(MurmurError::Forbidden)
        ));

        let rejection = warp::test::request().filter(&filter).await.unwrap_err();
        assert!(matches!(
            rejection.find::<MurmurError>(),
            Some(MurmurError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_filter_uses_remote_address() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(0.001, 1)));
        let filter = rate_limited(limiter, IpExtractionConfig::default());

        let first: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let second: SocketAddr = "192.0.2.2:5000".parse().unwrap();

        assert!(warp::test::request().remote_addr(first).filter(&filter).await.is_ok());
        let rejection = warp::test::request()
            .remote_addr(first)
            .filter(&filter)
            .await
            .unwrap_err();
        assert!(rejection.find::<RateLimitExceeded>().is_some());

        assert!(warp::test::request().remote_addr(second).filter(&filter).await.is_ok());
    }
}
