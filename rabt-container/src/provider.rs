//! Provider trait: a module of related registrations.
//!
//! Providers group services by concern so the composition root stays short:
//!
//! ```rust,ignore
//! container
//!     .add_provider(&DatabaseProvider)?
//!     .add_provider(&MailProvider)?;
//! ```

use crate::container::Container;
use crate::error::Result;

/// A module that registers related services into a container.
pub trait Provider: Send + Sync {
    /// Registers services. Called once per [`Container::add_provider`].
    fn register(&self, container: &Container) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::lifetime::Lifetime;
    use crate::resolver::ResolverApi;

    struct Database {
        url: &'static str,
    }

    struct Mailer;

    struct StorageProvider;

    impl Provider for StorageProvider {
        fn register(&self, container: &Container) -> Result<()> {
            container.register_instance(Arc::new(Database { url: "postgres://localhost" }))?;
            Ok(())
        }
    }

    struct MailProvider;

    impl Provider for MailProvider {
        fn register(&self, container: &Container) -> Result<()> {
            container.register_factory::<Mailer, _>(Lifetime::Singleton, |_| Ok(Arc::new(Mailer)))?;
            Ok(())
        }

        fn name(&self) -> &str {
            "mail"
        }
    }

    #[test]
    fn providers_register_services() {
        let container = Container::new();
        container
            .add_provider(&StorageProvider)
            .unwrap()
            .add_provider(&MailProvider)
            .unwrap();

        assert_eq!(container.resolve::<Database>().unwrap().url, "postgres://localhost");
        assert!(container.is_registered::<Mailer>());
    }

    #[test]
    fn provider_names() {
        assert!(StorageProvider.name().contains("StorageProvider"));
        assert_eq!(MailProvider.name(), "mail");
    }

    #[test]
    fn provider_errors_propagate() {
        let container = Container::new();
        container.dispose();
        assert!(container.add_provider(&StorageProvider).is_err());
    }
}
