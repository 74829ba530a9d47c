//! Security headers for HTTP responses
//!
//! Added to every reply the board sends, error replies included.

use warp::Reply;

/// Content Security Policy for the board page. The page loads its script
/// and style helpers from two CDNs and uses inline attributes.
pub const BOARD_CSP: &str = "default-src 'self'; \
     script-src 'self' 'unsafe-inline' cdn.jsdelivr.net; \
     style-src 'self' 'unsafe-inline' cdn.tailwindcss.com; \
     connect-src 'self' ws: wss:; \
     object-src 'none'; \
     frame-ancestors 'none'; \
     base-uri 'self';";

/// Wrap a reply with security headers
pub fn with_security_headers<T: Reply>(reply: T) -> impl Reply {
    // Prevent clickjacking
    let reply = warp::reply::with_header(reply, "X-Frame-Options", "DENY");
    // Prevent MIME type sniffing
    let reply = warp::reply::with_header(reply, "X-Content-Type-Options", "nosniff");
    let reply = warp::reply::with_header(reply, "Referrer-Policy", "strict-origin-when-cross-origin");
    warp::reply::with_header(reply, "Content-Security-Policy", BOARD_CSP)
}
