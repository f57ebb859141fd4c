//! MX lookups for rewritten destination domains.
//!
//! Only the first MX answer is used, in the order the server returned them.
//! Nothing is cached between lookups, and the domain is always queried as
//! an absolute name so the resolver's search list never applies.

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use tracing::{debug, warn};

use crate::error::DnsError;

/// Finds the mail exchange for a domain.
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// The host to deliver to, or `None` if the domain has no usable MX.
    async fn resolve_mx(&self, domain: &str) -> Option<String>;
}

/// [`MxResolver`] backed by the system resolver configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Builds a resolver from `/etc/resolv.conf` with caching disabled and a
    /// single attempt per query.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new() -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        opts.attempts = 1;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve_mx(&self, domain: &str) -> Option<String> {
        match self.resolver.mx_lookup(query_name(domain)).await {
            Ok(lookup) => {
                let host = first_exchange(lookup.iter().map(|mx| mx.exchange().to_utf8()));
                debug!("MX for {domain}: {host:?}");
                host
            }
            Err(err) if err.is_no_records_found() => {
                debug!("No MX records found for {domain}");
                None
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                None
            }
        }
    }
}

/// `domain` as an absolute name, with exactly one trailing dot.
fn query_name(domain: &str) -> String {
    format!("{}.", domain.trim_end_matches('.'))
}

/// Picks the first exchange name and strips the root label.
///
/// A null MX (`.`) means the domain accepts no mail.
pub fn first_exchange<I>(exchanges: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let first = exchanges.into_iter().next()?;
    let host = first.strip_suffix('.').unwrap_or(&first);

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn queries_are_absolute() {
        assert_eq!(query_name("b.com"), "b.com.");
        assert_eq!(query_name("b.com."), "b.com.");
        assert_eq!(query_name("localhost"), "localhost.");

        let name = hickory_resolver::proto::rr::Name::from_ascii(query_name("b.com")).unwrap();
        assert!(name.is_fqdn());
        assert_eq!(name.num_labels(), 2);
    }

    #[test]
    fn first_answer_wins() {
        assert_eq!(
            first_exchange(names(&["mx2.b.com.", "mx1.b.com."])),
            Some("mx2.b.com".to_string())
        );
    }

    #[test]
    fn relative_names_are_kept() {
        assert_eq!(
            first_exchange(names(&["mx.b.com"])),
            Some("mx.b.com".to_string())
        );
    }

    #[test]
    fn no_answers() {
        assert_eq!(first_exchange(Vec::new()), None);
    }

    #[test]
    fn null_mx() {
        assert_eq!(first_exchange(names(&["."])), None);
        assert_eq!(first_exchange(names(&["", "mx.b.com."])), None);
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn resolves_real_domain() {
        let resolver = DnsResolver::new().unwrap();
        let host = resolver.resolve_mx("gmail.com").await;

        assert!(host.is_some_and(|h| h.ends_with("google.com")));
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn missing_domain() {
        let resolver = DnsResolver::new().unwrap();

        assert_eq!(
            resolver
                .resolve_mx("this-domain-definitely-does-not-exist-12345.invalid")
                .await,
            None
        );
    }
}
