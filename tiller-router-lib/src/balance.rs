use http::header::COOKIE;
use http::HeaderMap;
use rand::Rng;

use crate::discovery::ServiceSet;
use crate::sticky::{StickyCodec, STICKY_COOKIE};

/// Outcome of a sticky selection: the backend to use and, when the
/// affinity had to be (re)established, the `Set-Cookie` directive to
/// attach to the response.
pub struct StickyPick {
    pub addr: String,
    pub set_cookie: Option<String>,
}

/// Uniformly random pick over the current live membership. `None` when
/// the pool is empty.
pub fn pick(set: &ServiceSet) -> Option<String> {
    let addrs = set.addrs();
    if addrs.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..addrs.len());
    addrs.into_iter().nth(idx)
}

/// Sticky pick: reuse the cookie's backend while it is still live, fall
/// back to a fresh pick (minting a new cookie) when the cookie is
/// missing, unreadable, or names an address that has gone away.
pub fn pick_sticky(
    set: &ServiceSet,
    codec: &StickyCodec,
    headers: &HeaderMap,
) -> Option<StickyPick> {
    if let Some(addr) = sticky_cookie_value(headers).and_then(|v| codec.open(&v)) {
        if set.addrs().iter().any(|a| *a == addr) {
            return Some(StickyPick { addr, set_cookie: None });
        }
    }

    let addr = pick(set)?;
    let set_cookie = codec.set_cookie(&addr);
    Some(StickyPick { addr, set_cookie })
}

/// Extracts the affinity cookie's value from the request's Cookie
/// headers, if present.
fn sticky_cookie_value(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == STICKY_COOKIE {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryClient, Instance, MemoryDiscovery};
    use http::HeaderValue;

    async fn pool(addrs: &[&str]) -> ServiceSet {
        let disco = MemoryDiscovery::new();
        for addr in addrs {
            disco.register("svc", Instance::new(*addr));
        }
        disco.service_set("svc").await.unwrap()
    }

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; _backend={value}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn pick_returns_none_for_empty_pool() {
        let set = pool(&[]).await;
        assert_eq!(pick(&set), None);
    }

    #[tokio::test]
    async fn pick_covers_all_members() {
        let set = pool(&["a:1", "b:1", "c:1"]).await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(pick(&set).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn sticky_reuses_live_cookie_backend() {
        let set = pool(&["a:1", "b:1", "c:1"]).await;
        let codec = StickyCodec::new(&[1u8; 32]);
        let cookie = codec.seal("b:1").unwrap();

        for _ in 0..20 {
            let picked = pick_sticky(&set, &codec, &cookie_headers(&cookie)).unwrap();
            assert_eq!(picked.addr, "b:1");
            assert!(picked.set_cookie.is_none());
        }
    }

    #[tokio::test]
    async fn sticky_falls_back_when_backend_is_gone() {
        let set = pool(&["a:1"]).await;
        let codec = StickyCodec::new(&[1u8; 32]);
        let cookie = codec.seal("gone:1").unwrap();

        let picked = pick_sticky(&set, &codec, &cookie_headers(&cookie)).unwrap();
        assert_eq!(picked.addr, "a:1");
        assert!(picked.set_cookie.is_some());
    }

    #[tokio::test]
    async fn sticky_falls_back_on_foreign_key_cookie() {
        let set = pool(&["a:1"]).await;
        let codec = StickyCodec::new(&[1u8; 32]);
        let foreign = StickyCodec::new(&[2u8; 32]).seal("a:1").unwrap();

        let picked = pick_sticky(&set, &codec, &cookie_headers(&foreign)).unwrap();
        assert_eq!(picked.addr, "a:1");
        assert!(picked.set_cookie.is_some(), "tampered cookie must be re-minted");
    }
}
