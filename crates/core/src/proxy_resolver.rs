//! Proxy lookup for applications that share the host network.

use std::sync::Arc;

use portal_runtime::{Caller, Error, Result};
use tracing::debug;

/// Resolves the proxies to use for a URI.
pub trait ProxyLookup: Send + Sync {
	/// Proxy URIs in order of preference; `direct://` means no proxy.
	fn lookup(&self, uri: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct ProxyResolver {
	backend: Arc<dyn ProxyLookup>,
}

impl ProxyResolver {
	pub fn new(backend: Arc<dyn ProxyLookup>) -> Self {
		Self { backend }
	}

	/// Looks up proxies for `uri`.
	///
	/// # Errors
	///
	/// [`Error::NotAllowed`] unless the caller is the host or its sandbox
	/// shares the network. Backend failures other than a malformed URI
	/// surface as [`Error::Backend`].
	pub fn lookup(&self, caller: &Caller, uri: &str) -> Result<Vec<String>> {
		if !caller.app.shares("network") {
			debug!(target = "portal.proxy", app = %caller.app, "proxy lookup without network access");
			return Err(Error::NotAllowed("This call is not available inside the sandbox".to_string()));
		}
		self.backend.lookup(uri).map_err(|err| match err {
			Error::InvalidArgument(_) | Error::Backend(_) => err,
			other => Error::backend(other),
		})
	}
}

#[cfg(test)]
mod tests {
	use portal_protocol::ErrorName;
	use portal_runtime::{AppIdentity, ConnectionId};

	use super::*;

	struct Fixed;

	impl ProxyLookup for Fixed {
		fn lookup(&self, uri: &str) -> Result<Vec<String>> {
			if uri.is_empty() {
				return Err(Error::backend("resolver unavailable"));
			}
			Ok(vec!["http://proxy:3128".to_string(), "direct://".to_string()])
		}
	}

	fn caller(app: AppIdentity) -> Caller {
		Caller::new(app, ConnectionId::new(":1.1"))
	}

	#[test]
	fn sandbox_without_network_is_not_allowed() {
		let resolver = ProxyResolver::new(Arc::new(Fixed));
		let app = caller(AppIdentity::sandboxed("org.example.Offline", vec!["ipc".to_string()]));

		let err = resolver.lookup(&app, "https://example.com").unwrap_err();
		assert_eq!(err.kind(), ErrorName::NotAllowed);
		assert_eq!(err.to_string(), "This call is not available inside the sandbox");
	}

	#[test]
	fn host_and_networked_sandbox_get_proxies() {
		let resolver = ProxyResolver::new(Arc::new(Fixed));
		let networked = caller(AppIdentity::sandboxed("org.example.Web", vec!["network".to_string()]));

		assert_eq!(resolver.lookup(&networked, "https://example.com").unwrap().len(), 2);
		assert!(resolver.lookup(&caller(AppIdentity::host()), "https://example.com").is_ok());
	}

	#[test]
	fn backend_errors_are_failed() {
		let resolver = ProxyResolver::new(Arc::new(Fixed));
		let err = resolver.lookup(&caller(AppIdentity::host()), "").unwrap_err();
		assert_eq!(err.kind(), ErrorName::Failed);
	}
}
