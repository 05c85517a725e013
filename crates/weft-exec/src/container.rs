use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use weft_core::{Activity, ActivityPlan, Erased, ErasedActivity};

type ServiceFactory = Box<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;
type ActivityFactory =
    Box<dyn Fn(&ServiceScope) -> Result<Box<dyn ErasedActivity>, ResolveError> + Send + Sync>;

/// Errors produced when registering services or activity constructors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The type is already registered.
    #[error("`{0}` is already registered")]
    Duplicate(&'static str),
}

/// Errors produced while resolving services or instantiating activities.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No registration exists for the requested service type.
    #[error("no service registered for `{0}`")]
    UnknownService(&'static str),
    /// No constructor was registered for the activity type token.
    #[error("no activity registered for `{0}`")]
    UnknownActivity(&'static str),
    /// A registered constructor failed.
    #[error("constructing `{type_name}` failed: {message}")]
    Construction {
        type_name: &'static str,
        message: String,
    },
}

impl ResolveError {
    /// Constructor failure for `T` with the given reason.
    pub fn construction<T>(message: impl Into<String>) -> Self {
        ResolveError::Construction {
            type_name: type_name::<T>(),
            message: message.into(),
        }
    }
}

enum ServiceRegistration {
    /// Pre-built instance shared by every run.
    Instance(Arc<dyn Any + Send + Sync>),
    /// Constructed once per run, then cached on the scope.
    Singleton(ServiceFactory),
    /// Constructed fresh on every resolve.
    Transient(ServiceFactory),
}

/// Registration store for services and activity constructors.
///
/// Activity types publish a constructor descriptor at registration time;
/// the executor resolves instances by type token through a per-run
/// [`ServiceScope`].
#[derive(Default)]
pub struct ServiceContainer {
    services: HashMap<TypeId, (&'static str, ServiceRegistration)>,
    activities: HashMap<TypeId, (&'static str, ActivityFactory)>,
}

impl ServiceContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_service(
        &mut self,
        token: TypeId,
        name: &'static str,
        registration: ServiceRegistration,
    ) -> Result<(), RegistryError> {
        if self.services.contains_key(&token) {
            return Err(RegistryError::Duplicate(name));
        }
        self.services.insert(token, (name, registration));
        Ok(())
    }

    /// Register a pre-built singleton instance.
    pub fn add_instance<T: Send + Sync + 'static>(&mut self, instance: T) -> Result<(), RegistryError> {
        self.add_service(
            TypeId::of::<T>(),
            type_name::<T>(),
            ServiceRegistration::Instance(Arc::new(instance)),
        )
    }

    /// Register a service constructed once per run.
    pub fn add_singleton<T, F>(&mut self, factory: F) -> Result<(), RegistryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.add_service(
            TypeId::of::<T>(),
            type_name::<T>(),
            ServiceRegistration::Singleton(Box::new(move || Arc::new(factory()))),
        )
    }

    /// Register a service constructed fresh on every resolve.
    pub fn add_transient<T, F>(&mut self, factory: F) -> Result<(), RegistryError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.add_service(
            TypeId::of::<T>(),
            type_name::<T>(),
            ServiceRegistration::Transient(Box::new(move || Arc::new(factory()))),
        )
    }

    /// Register an activity constructor; the factory receives the run scope
    /// to resolve injected dependencies.
    pub fn register_activity<A, F>(&mut self, factory: F) -> Result<(), RegistryError>
    where
        A: Activity,
        F: Fn(&ServiceScope) -> Result<A, ResolveError> + Send + Sync + 'static,
    {
        let token = TypeId::of::<A>();
        if self.activities.contains_key(&token) {
            return Err(RegistryError::Duplicate(type_name::<A>()));
        }
        let erased: ActivityFactory = Box::new(move |scope| {
            factory(scope).map(|activity| Box::new(Erased(activity)) as Box<dyn ErasedActivity>)
        });
        self.activities.insert(token, (type_name::<A>(), erased));
        Ok(())
    }

    /// Register an activity with a no-argument constructor.
    pub fn register_default_activity<A>(&mut self) -> Result<(), RegistryError>
    where
        A: Activity + Default,
    {
        self.register_activity::<A, _>(|_| Ok(A::default()))
    }
}

/// Per-run resolution scope: caches run singletons and constructs activity
/// instances by type token.
pub struct ServiceScope {
    container: Arc<ServiceContainer>,
    run_singletons: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceScope {
    /// Open a scope for one run.
    pub fn new(container: Arc<ServiceContainer>) -> Self {
        Self {
            container,
            run_singletons: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a service by type.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        let token = TypeId::of::<T>();
        let Some((name, registration)) = self.container.services.get(&token) else {
            return Err(ResolveError::UnknownService(type_name::<T>()));
        };
        let raw = match registration {
            ServiceRegistration::Instance(instance) => Arc::clone(instance),
            ServiceRegistration::Singleton(factory) => {
                let mut cache = self
                    .run_singletons
                    .lock()
                    .expect("run singleton cache poisoned");
                Arc::clone(cache.entry(token).or_insert_with(|| factory()))
            }
            ServiceRegistration::Transient(factory) => factory(),
        };
        raw.downcast::<T>().map_err(|_| ResolveError::Construction {
            type_name: name,
            message: "registered value has a different type".to_string(),
        })
    }

    /// Construct the activity instance for a node's type token.
    pub fn instantiate(&self, plan: &ActivityPlan) -> Result<Box<dyn ErasedActivity>, ResolveError> {
        let Some((_, factory)) = self.container.activities.get(&plan.token()) else {
            return Err(ResolveError::UnknownActivity(plan.type_name()));
        };
        factory(self)
    }
}
