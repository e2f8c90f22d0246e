//! Per-request admission: managed deployment host or catnip's own surface

use crate::directory::{DirectoryError, DomainDirectory};
use crate::memoize::Memoized;
use metrics::gauge;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long the set of known hostnames is reused
pub const DOMAIN_REFRESH_WINDOW: Duration = Duration::from_secs(15);

/// Which pipeline a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The Host belongs to a deployment managed by O-Neko
    Managed,
    /// Anything else, served by catnip itself
    PassThrough,
}

pub struct AdmissionMux {
    domains: Memoized<Arc<HashSet<String>>, DirectoryError>,
}

impl AdmissionMux {
    pub fn new(directory: Arc<DomainDirectory>) -> Self {
        Self::with_window(directory, DOMAIN_REFRESH_WINDOW)
    }

    pub fn with_window(directory: Arc<DomainDirectory>, window: Duration) -> Self {
        let domains = Memoized::new(window, move || {
            let directory = Arc::clone(&directory);
            async move {
                let hostnames = directory.all_known_hostnames().await?;
                gauge!("oneko_catnip_oneko_projectversion_domains").set(hostnames.len() as f64);
                Ok::<_, DirectoryError>(Arc::new(hostnames))
            }
        });
        Self { domains }
    }

    /// Decide the pipeline for a request with the given Host header.
    ///
    /// Fails open: if the hostname set cannot be fetched, the request is
    /// served by catnip itself.
    pub async fn admit(&self, host: Option<&str>) -> Admission {
        let Some(host) = host else {
            return Admission::PassThrough;
        };

        match self.domains.get().await {
            Ok(domains) if domains.contains(host) => Admission::Managed,
            Ok(_) => Admission::PassThrough,
            Err(e) => {
                warn!(error = %e.error, "Could not fetch known hostnames");
                Admission::PassThrough
            }
        }
    }
}
