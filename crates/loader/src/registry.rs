use crate::contract::{LoadError, Loader};
use crate::postgres::PostgresLoader;
use futures::future::BoxFuture;
use lazy_static::lazy_static;
use models::DbConfig;
use std::collections::BTreeMap;

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Loader>, LoadError>>;
type BackendFactory = fn(DbConfig) -> ConnectFuture;

// The registry is a process-wide map from backend name to connect factory,
// populated by the backends this binary links in. Additional engines
// (columnar warehouses, object-store loaders) add an entry here without
// touching parse, dedup, or orchestration.
lazy_static! {
    static ref REGISTRY: BTreeMap<&'static str, BackendFactory> = {
        let mut backends = BTreeMap::new();
        backends.insert("postgres", postgres_factory as BackendFactory);
        backends.insert("postgresql", postgres_factory as BackendFactory);
        backends
    };
}

fn postgres_factory(config: DbConfig) -> ConnectFuture {
    Box::pin(async move {
        let loader = PostgresLoader::connect(&config).await?;
        Ok(Box::new(loader) as Box<dyn Loader>)
    })
}

/// Connects the backend registered under `config.type`.
pub async fn connect(config: &DbConfig) -> Result<Box<dyn Loader>, LoadError> {
    let name = config.r#type.to_ascii_lowercase();
    let factory = REGISTRY
        .get(name.as_str())
        .ok_or_else(|| LoadError::UnknownBackend(config.r#type.clone()))?;
    tracing::debug!(backend = %name, host = %config.host, dbname = %config.dbname, "connecting backend");
    factory(config.clone()).await
}

/// The stable identifiers backends registered under.
pub fn backend_names() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn postgres_is_registered_under_both_names() {
        let names = backend_names();
        assert!(names.contains(&"postgres"));
        assert!(names.contains(&"postgresql"));
    }

    #[tokio::test]
    async fn unknown_backends_are_rejected() {
        let config = DbConfig {
            r#type: "sqlite".to_string(),
            ..DbConfig::default()
        };
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, LoadError::UnknownBackend(name) if name == "sqlite"));
    }
}
