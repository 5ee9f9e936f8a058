//! Plain (non-event-sourced) aggregates and their repositories.
//!
//! Plain aggregates are loaded by a [`Repository`] instead of event replay.
//! The context never persists them; a repository is a read path into state
//! owned elsewhere.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateIdentity;

use crate::error::DomainError;

/// Contract for aggregates whose state is loaded whole rather than
/// rebuilt from events.
pub trait PlainAggregate: Send + Sync + 'static {
    /// Stable aggregate type name.
    fn aggregate_type() -> &'static str;

    /// The aggregate's identity.
    fn identity(&self) -> &AggregateIdentity;
}

/// Loads plain aggregates by identity.
#[async_trait]
pub trait Repository<A: PlainAggregate>: Send + Sync {
    /// Returns the aggregate, or None when it does not exist.
    async fn load(&self, identity: &AggregateIdentity) -> Result<Option<A>, DomainError>;
}

#[async_trait]
trait ErasedRepository: Send + Sync {
    async fn load_boxed(
        &self,
        identity: &AggregateIdentity,
    ) -> Result<Option<Box<dyn Any + Send + Sync>>, DomainError>;
}

struct TypedRepository<A: PlainAggregate> {
    inner: Arc<dyn Repository<A>>,
}

#[async_trait]
impl<A: PlainAggregate> ErasedRepository for TypedRepository<A> {
    async fn load_boxed(
        &self,
        identity: &AggregateIdentity,
    ) -> Result<Option<Box<dyn Any + Send + Sync>>, DomainError> {
        let loaded = self.inner.load(identity).await?;
        Ok(loaded.map(|aggregate| Box::new(aggregate) as Box<dyn Any + Send + Sync>))
    }
}

/// Registry of repositories, one per plain aggregate type.
///
/// Built once at startup through [`RepositoryRegistryBuilder`] and shared
/// by `Arc`.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<TypeId, Arc<dyn ErasedRepository>>,
}

impl RepositoryRegistry {
    /// Starts building a registry.
    pub fn builder() -> RepositoryRegistryBuilder {
        RepositoryRegistryBuilder {
            repositories: HashMap::new(),
        }
    }

    /// Loads a plain aggregate through its registered repository.
    pub async fn load<A: PlainAggregate>(
        &self,
        identity: &AggregateIdentity,
    ) -> Result<Option<A>, DomainError> {
        let repository = self
            .repositories
            .get(&TypeId::of::<A>())
            .ok_or(DomainError::NoRepository {
                aggregate_type: A::aggregate_type(),
            })?;
        let loaded = repository.load_boxed(identity).await?;
        Ok(loaded.and_then(|boxed| boxed.downcast::<A>().ok().map(|aggregate| *aggregate)))
    }
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &self.repositories.len())
            .finish()
    }
}

/// Builder collecting repositories before freezing them into a
/// [`RepositoryRegistry`].
pub struct RepositoryRegistryBuilder {
    repositories: HashMap<TypeId, Arc<dyn ErasedRepository>>,
}

impl RepositoryRegistryBuilder {
    /// Registers the repository for one plain aggregate type.
    ///
    /// A second registration for the same type is a fatal configuration
    /// error.
    pub fn repository<A: PlainAggregate>(
        mut self,
        repository: Arc<dyn Repository<A>>,
    ) -> Result<Self, DomainError> {
        let key = TypeId::of::<A>();
        if self.repositories.contains_key(&key) {
            return Err(DomainError::DuplicateRepository {
                aggregate_type: A::aggregate_type(),
            });
        }
        self.repositories
            .insert(key, Arc::new(TypedRepository { inner: repository }));
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> RepositoryRegistry {
        RepositoryRegistry {
            repositories: self.repositories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tariff {
        identity: AggregateIdentity,
        rate: u32,
    }

    impl PlainAggregate for Tariff {
        fn aggregate_type() -> &'static str {
            "Tariff"
        }
        fn identity(&self) -> &AggregateIdentity {
            &self.identity
        }
    }

    struct FixedTariffs;

    #[async_trait]
    impl Repository<Tariff> for FixedTariffs {
        async fn load(&self, identity: &AggregateIdentity) -> Result<Option<Tariff>, DomainError> {
            if identity.instance_id == "standard" {
                Ok(Some(Tariff {
                    identity: identity.clone(),
                    rate: 21,
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn load_through_registry() {
        let registry = RepositoryRegistry::builder()
            .repository::<Tariff>(Arc::new(FixedTariffs))
            .unwrap()
            .build();

        let found = registry
            .load::<Tariff>(&AggregateIdentity::local("Tariff", "standard"))
            .await
            .unwrap();
        assert_eq!(found.map(|tariff| tariff.rate), Some(21));

        let missing = registry
            .load::<Tariff>(&AggregateIdentity::local("Tariff", "reduced"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn unregistered_type_is_an_error() {
        let registry = RepositoryRegistry::builder().build();
        let result = registry
            .load::<Tariff>(&AggregateIdentity::local("Tariff", "standard"))
            .await;
        assert!(matches!(result, Err(DomainError::NoRepository { .. })));
    }

    #[test]
    fn duplicate_registration_fails_at_build() {
        let result = RepositoryRegistry::builder()
            .repository::<Tariff>(Arc::new(FixedTariffs))
            .unwrap()
            .repository::<Tariff>(Arc::new(FixedTariffs));
        assert!(matches!(
            result,
            Err(DomainError::DuplicateRepository { .. })
        ));
    }
}
