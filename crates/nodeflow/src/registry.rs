// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Service registry with dependency injection.
//!
//! Stores registrations by interface name and service name, owns the live
//! instances (arena-style: instances refer back to their registration by
//! id only), and reports a status snapshot. Resolution returns an opaque
//! `Arc<dyn Any>` handle that callers downcast to the declared interface
//! at the boundary; the typed helpers do that downcast.
//!
//! v1 restrictions: factories and the transient lifecycle are reserved and
//! fail with `NotImplemented`; singletons must have a live instance (from
//! `register_instance` or eager construction) to resolve.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};

/// Lifecycle pattern of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLifecycle {
    Singleton,
    Transient,
    Scoped,
}

impl fmt::Display for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceLifecycle::Singleton => "singleton",
            ServiceLifecycle::Transient => "transient",
            ServiceLifecycle::Scoped => "scoped",
        };
        f.write_str(name)
    }
}

/// Injection scope of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionScope {
    Global,
    Request,
}

impl fmt::Display for InjectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InjectionScope::Global => "global",
            InjectionScope::Request => "request",
        };
        f.write_str(name)
    }
}

/// Health of a registration as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Descriptive metadata attached to a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub service_id: Uuid,
    /// Human-readable name, unique per registry.
    pub service_name: String,
    pub interface_name: String,
    pub implementation_name: String,
    pub tags: Vec<String>,
    pub configuration: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

/// One registered service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub registration_id: Uuid,
    pub metadata: ServiceMetadata,
    pub lifecycle: ServiceLifecycle,
    pub scope: InjectionScope,
    pub health: ServiceHealth,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub instance_count: u64,
}

impl ServiceRegistration {
    fn mark_accessed(&mut self) {
        self.last_accessed_at = Some(Utc::now());
        self.access_count += 1;
    }
}

/// A live instance owned by its registration.
#[derive(Clone)]
pub struct ServiceInstance {
    pub instance_id: Uuid,
    pub registration_id: Uuid,
    value: Arc<dyn Any + Send + Sync>,
    pub lifecycle: ServiceLifecycle,
    pub scope: InjectionScope,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    disposed: bool,
}

impl ServiceInstance {
    fn new(
        registration_id: Uuid,
        value: Arc<dyn Any + Send + Sync>,
        lifecycle: ServiceLifecycle,
        scope: InjectionScope,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::new_v4(),
            registration_id,
            value,
            lifecycle,
            scope,
            created_at: now,
            last_accessed_at: now,
            disposed: false,
        }
    }

    /// The stored value as an opaque handle.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.value)
    }

    /// Once disposed, an instance is never returned from resolve.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("instance_id", &self.instance_id)
            .field("registration_id", &self.registration_id)
            .field("lifecycle", &self.lifecycle)
            .field("scope", &self.scope)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Overall registry state in a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryOperationStatus {
    Pending,
    Success,
    Failed,
}

/// Point-in-time registry status report.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub registry_id: Uuid,
    pub status: RegistryOperationStatus,
    pub message: String,
    pub registration_count: usize,
    pub active_instances: usize,
    pub failed_registrations: u64,
    pub lifecycle_distribution: HashMap<String, usize>,
    pub scope_distribution: HashMap<String, usize>,
    pub health_summary: HashMap<String, usize>,
    pub avg_resolution_time_ms: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    registrations: HashMap<Uuid, ServiceRegistration>,
    instances: HashMap<Uuid, Vec<ServiceInstance>>,
    /// Interface name to registration ids, insertion order preserved.
    interface_map: HashMap<String, Vec<Uuid>>,
    name_map: HashMap<String, Uuid>,
    resolution_metrics: HashMap<String, f64>,
    failed_registrations: u64,
}

/// Service registry with lifecycle bookkeeping.
pub struct ServiceRegistry {
    registry_id: Uuid,
    config: RegistryConfig,
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        info!(registry = %config.registry_name, "service registry initialized");
        Self {
            registry_id: Uuid::new_v4(),
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    #[must_use]
    pub fn registry_id(&self) -> Uuid {
        self.registry_id
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a service by interface and constructor.
    ///
    /// When lazy loading is disabled and the lifecycle is singleton, the
    /// constructor runs now and the instance is cached; otherwise the
    /// constructor is discarded (v1 has no factory storage) and a later
    /// resolve of a lazy singleton fails.
    pub fn register_service<T, F>(
        &self,
        interface: &str,
        implementation: &str,
        lifecycle: ServiceLifecycle,
        scope: InjectionScope,
        configuration: Option<Map<String, Value>>,
        constructor: F,
    ) -> Result<Uuid>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let outcome = self.insert_registration(
            interface,
            implementation,
            implementation,
            lifecycle,
            scope,
            vec!["core".to_string()],
            configuration.unwrap_or_default(),
        );
        let registration_id = match outcome {
            Ok(id) => id,
            Err(err) => {
                self.inner.write().failed_registrations += 1;
                return Err(Error::RegistryResolutionFailed(format!(
                    "service registration failed: {err}"
                )));
            }
        };

        if !self.config.lazy_loading && lifecycle == ServiceLifecycle::Singleton {
            let instance: Arc<dyn Any + Send + Sync> = Arc::new(constructor());
            self.store_instance(registration_id, instance, lifecycle, scope);
        }

        info!(
            interface,
            implementation,
            %registration_id,
            %lifecycle,
            "service registered"
        );
        Ok(registration_id)
    }

    /// Register an existing instance. Always singleton.
    pub fn register_instance<T>(
        &self,
        interface: &str,
        instance: Arc<T>,
        scope: InjectionScope,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Uuid>
    where
        T: Send + Sync + 'static,
    {
        let name = short_type_name::<T>();
        self.register_named_instance(interface, &name, instance, scope, metadata)
    }

    /// Register an existing instance under an explicit service name.
    pub fn register_named_instance<T>(
        &self,
        interface: &str,
        name: &str,
        instance: Arc<T>,
        scope: InjectionScope,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Uuid>
    where
        T: Send + Sync + 'static,
    {
        let outcome = self.insert_registration(
            interface,
            name,
            &short_type_name::<T>(),
            ServiceLifecycle::Singleton,
            scope,
            vec!["instance".to_string()],
            metadata.unwrap_or_default(),
        );
        let registration_id = match outcome {
            Ok(id) => id,
            Err(err) => {
                self.inner.write().failed_registrations += 1;
                return Err(Error::RegistryResolutionFailed(format!(
                    "instance registration failed: {err}"
                )));
            }
        };

        let handle: Arc<dyn Any + Send + Sync> = instance;
        self.store_instance(registration_id, handle, ServiceLifecycle::Singleton, scope);
        info!(interface, name, %registration_id, "service instance registered");
        Ok(registration_id)
    }

    /// Reserved for a later version.
    pub fn register_factory(
        &self,
        _interface: &str,
        _lifecycle: ServiceLifecycle,
        _scope: InjectionScope,
    ) -> Result<Uuid> {
        Err(Error::NotImplemented(
            "factory registration is reserved for a later version".to_string(),
        ))
    }

    /// Remove a registration and dispose all of its instances.
    pub fn unregister(&self, registration_id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(registration) = inner.registrations.remove(&registration_id) else {
            return false;
        };

        if let Some(mut instances) = inner.instances.remove(&registration_id) {
            for instance in &mut instances {
                instance.dispose();
            }
        }

        let interface_name = registration.metadata.interface_name.clone();
        if let Some(ids) = inner.interface_map.get_mut(&interface_name) {
            ids.retain(|id| *id != registration_id);
            if ids.is_empty() {
                inner.interface_map.remove(&interface_name);
            }
        }
        inner.name_map.remove(&registration.metadata.service_name);

        info!(%registration_id, "service unregistered");
        true
    }

    /// Resolve the first registration for an interface as an opaque handle.
    pub fn resolve_handle(&self, interface: &str) -> Result<Arc<dyn Any + Send + Sync>> {
        let started = Instant::now();
        let mut inner = self.inner.write();

        let registration_id = inner
            .interface_map
            .get(interface)
            .and_then(|ids| ids.first().copied())
            .ok_or_else(|| {
                Error::RegistryResolutionFailed(format!(
                    "no service registered for interface: {interface}"
                ))
            })?;

        let lifecycle = {
            let registration = inner
                .registrations
                .get_mut(&registration_id)
                .ok_or_else(|| {
                    Error::RegistryResolutionFailed(format!(
                        "registration missing for interface: {interface}"
                    ))
                })?;
            registration.mark_accessed();
            registration.lifecycle
        };

        let handle = Self::resolve_by_lifecycle(&mut inner, registration_id, lifecycle)?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        inner
            .resolution_metrics
            .insert(format!("resolve_{interface}"), elapsed_ms);
        debug!(interface, %registration_id, elapsed_ms, "service resolved");
        Ok(handle)
    }

    /// Resolve and downcast to the declared interface type.
    pub fn resolve<T>(&self, interface: &str) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let handle = self.resolve_handle(interface)?;
        downcast_handle(handle, interface)
    }

    /// Resolve a specific registration by service name.
    pub fn resolve_named<T>(&self, interface: &str, name: &str) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let handle = self.resolve_named_handle(interface, name)?;
        downcast_handle(handle, interface)
    }

    /// Resolve by service name as an opaque handle.
    pub fn resolve_named_handle(
        &self,
        interface: &str,
        name: &str,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        let mut inner = self.inner.write();
        let registration_id = *inner.name_map.get(name).ok_or_else(|| {
            Error::RegistryResolutionFailed(format!("no service registered with name: {name}"))
        })?;

        let lifecycle = {
            let registration = inner
                .registrations
                .get_mut(&registration_id)
                .ok_or_else(|| {
                    Error::RegistryResolutionFailed(format!(
                        "registration missing for name: {name}"
                    ))
                })?;
            if registration.metadata.interface_name != interface {
                return Err(Error::RegistryResolutionFailed(format!(
                    "service {name} implements {}, not {interface}",
                    registration.metadata.interface_name
                )));
            }
            registration.mark_accessed();
            registration.lifecycle
        };

        Self::resolve_by_lifecycle(&mut inner, registration_id, lifecycle)
    }

    /// Resolve every registration for an interface, in registration order.
    pub fn resolve_all_handles(&self, interface: &str) -> Result<Vec<Arc<dyn Any + Send + Sync>>> {
        let mut inner = self.inner.write();
        let ids = match inner.interface_map.get(interface) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };

        let mut handles = Vec::with_capacity(ids.len());
        for registration_id in ids {
            let lifecycle = {
                let registration =
                    inner
                        .registrations
                        .get_mut(&registration_id)
                        .ok_or_else(|| {
                            Error::RegistryResolutionFailed(format!(
                                "registration missing for interface: {interface}"
                            ))
                        })?;
                registration.mark_accessed();
                registration.lifecycle
            };
            handles.push(Self::resolve_by_lifecycle(
                &mut inner,
                registration_id,
                lifecycle,
            )?);
        }
        Ok(handles)
    }

    /// Resolve without raising; `None` on any failure.
    pub fn try_resolve<T>(&self, interface: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.resolve::<T>(interface).ok()
    }

    /// Look up a registration snapshot by id.
    pub fn registration(&self, registration_id: Uuid) -> Option<ServiceRegistration> {
        self.inner.read().registrations.get(&registration_id).cloned()
    }

    /// All registrations for an interface, in registration order.
    pub fn registrations_for(&self, interface: &str) -> Vec<ServiceRegistration> {
        let inner = self.inner.read();
        inner
            .interface_map
            .get(interface)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.registrations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registration in the registry.
    pub fn all_registrations(&self) -> Vec<ServiceRegistration> {
        self.inner.read().registrations.values().cloned().collect()
    }

    /// Live (non-disposed) instances, optionally filtered by registration.
    pub fn active_instances(&self, registration_id: Option<Uuid>) -> Vec<ServiceInstance> {
        let inner = self.inner.read();
        match registration_id {
            Some(id) => inner
                .instances
                .get(&id)
                .map(|list| list.iter().filter(|i| !i.is_disposed()).cloned().collect())
                .unwrap_or_default(),
            None => inner
                .instances
                .values()
                .flatten()
                .filter(|i| !i.is_disposed())
                .cloned()
                .collect(),
        }
    }

    /// Dispose matching instances; returns how many were disposed.
    pub fn dispose_instances(
        &self,
        registration_id: Uuid,
        scope: Option<InjectionScope>,
    ) -> usize {
        let mut inner = self.inner.write();
        let Some(instances) = inner.instances.get_mut(&registration_id) else {
            return 0;
        };

        let mut disposed = 0;
        for instance in instances.iter_mut() {
            if scope.map_or(true, |s| instance.scope == s) {
                instance.dispose();
                disposed += 1;
            }
        }
        instances.retain(|instance| !instance.is_disposed());
        disposed
    }

    /// Merge configuration into a registration's metadata.
    pub fn update_configuration(
        &self,
        registration_id: Uuid,
        configuration: Map<String, Value>,
    ) -> bool {
        let mut inner = self.inner.write();
        let Some(registration) = inner.registrations.get_mut(&registration_id) else {
            return false;
        };
        for (key, value) in configuration {
            registration.metadata.configuration.insert(key, value);
        }
        registration.metadata.last_modified_at = Utc::now();
        true
    }

    /// Comprehensive status snapshot.
    pub fn status(&self) -> RegistryStatus {
        let inner = self.inner.read();

        let mut lifecycle_distribution: HashMap<String, usize> = HashMap::new();
        let mut scope_distribution: HashMap<String, usize> = HashMap::new();
        let mut health_summary: HashMap<String, usize> = HashMap::new();
        for registration in inner.registrations.values() {
            *lifecycle_distribution
                .entry(registration.lifecycle.to_string())
                .or_default() += 1;
            *scope_distribution
                .entry(registration.scope.to_string())
                .or_default() += 1;
            let health = match registration.health {
                ServiceHealth::Unknown => "unknown",
                ServiceHealth::Healthy => "healthy",
                ServiceHealth::Unhealthy => "unhealthy",
            };
            *health_summary.entry(health.to_string()).or_default() += 1;
        }

        let active_instances = inner
            .instances
            .values()
            .map(|list| list.iter().filter(|i| !i.is_disposed()).count())
            .sum();

        let avg_resolution_time_ms = if inner.resolution_metrics.is_empty() {
            None
        } else {
            Some(
                inner.resolution_metrics.values().sum::<f64>()
                    / inner.resolution_metrics.len() as f64,
            )
        };

        let mut status = RegistryOperationStatus::Success;
        if inner.failed_registrations > 0 {
            status = RegistryOperationStatus::Failed;
        }
        if inner.registrations.is_empty() {
            status = RegistryOperationStatus::Pending;
        }

        RegistryStatus {
            registry_id: self.registry_id,
            status,
            message: format!(
                "Registry operational with {} services",
                inner.registrations.len()
            ),
            registration_count: inner.registrations.len(),
            active_instances,
            failed_registrations: inner.failed_registrations,
            lifecycle_distribution,
            scope_distribution,
            health_summary,
            avg_resolution_time_ms,
            last_updated: Utc::now(),
        }
    }

    fn insert_registration(
        &self,
        interface: &str,
        service_name: &str,
        implementation: &str,
        lifecycle: ServiceLifecycle,
        scope: InjectionScope,
        tags: Vec<String>,
        configuration: Map<String, Value>,
    ) -> std::result::Result<Uuid, String> {
        if interface.is_empty() {
            return Err("interface name must not be empty".to_string());
        }
        if service_name.is_empty() {
            return Err("service name must not be empty".to_string());
        }

        let mut inner = self.inner.write();
        if inner.name_map.contains_key(service_name) {
            return Err(format!("service name already registered: {service_name}"));
        }

        let registration_id = Uuid::new_v4();
        let now = Utc::now();
        let registration = ServiceRegistration {
            registration_id,
            metadata: ServiceMetadata {
                service_id: registration_id,
                service_name: service_name.to_string(),
                interface_name: interface.to_string(),
                implementation_name: implementation.to_string(),
                tags,
                configuration,
                created_at: now,
                last_modified_at: now,
            },
            lifecycle,
            scope,
            health: ServiceHealth::Unknown,
            last_accessed_at: None,
            access_count: 0,
            instance_count: 0,
        };

        inner.registrations.insert(registration_id, registration);
        inner
            .interface_map
            .entry(interface.to_string())
            .or_default()
            .push(registration_id);
        inner
            .name_map
            .insert(service_name.to_string(), registration_id);
        Ok(registration_id)
    }

    fn store_instance(
        &self,
        registration_id: Uuid,
        value: Arc<dyn Any + Send + Sync>,
        lifecycle: ServiceLifecycle,
        scope: InjectionScope,
    ) {
        let mut inner = self.inner.write();
        let instance = ServiceInstance::new(registration_id, value, lifecycle, scope);
        inner
            .instances
            .entry(registration_id)
            .or_default()
            .push(instance);
        if let Some(registration) = inner.registrations.get_mut(&registration_id) {
            registration.instance_count += 1;
        }
    }

    fn resolve_by_lifecycle(
        inner: &mut RegistryInner,
        registration_id: Uuid,
        lifecycle: ServiceLifecycle,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        match lifecycle {
            ServiceLifecycle::Singleton => {
                let instance = inner
                    .instances
                    .get_mut(&registration_id)
                    .and_then(|list| list.iter_mut().find(|i| !i.is_disposed()));
                match instance {
                    Some(instance) => {
                        instance.last_accessed_at = Utc::now();
                        Ok(instance.handle())
                    }
                    None => Err(Error::RegistryResolutionFailed(format!(
                        "singleton instance not found and cannot be created (registration {registration_id})"
                    ))),
                }
            }
            ServiceLifecycle::Transient => Err(Error::NotImplemented(
                "transient lifecycle requires factory support, reserved for a later version"
                    .to_string(),
            )),
            ServiceLifecycle::Scoped => Err(Error::NotImplemented(
                "scoped lifecycle requires an injection-scope manager, reserved for a later version"
                    .to_string(),
            )),
        }
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registry_id", &self.registry_id)
            .field("registry_name", &self.config.registry_name)
            .finish_non_exhaustive()
    }
}

fn downcast_handle<T>(handle: Arc<dyn Any + Send + Sync>, interface: &str) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
{
    handle.downcast::<T>().map_err(|_| {
        warn!(interface, "resolved instance has unexpected concrete type");
        Error::RegistryResolutionFailed(format!(
            "instance registered for {interface} is not a {}",
            short_type_name::<T>()
        ))
    })
}

fn short_type_name<T>() -> String {
    std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Clock {
        ticks: u64,
    }

    #[derive(Debug)]
    struct Logger;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(RegistryConfig::default())
    }

    #[test]
    fn test_register_and_resolve_instance() {
        let registry = registry();
        let clock = Arc::new(Clock { ticks: 9 });
        registry
            .register_instance("Clock", clock, InjectionScope::Global, None)
            .unwrap();

        let resolved = registry.resolve::<Clock>("Clock").unwrap();
        assert_eq!(resolved.ticks, 9);
    }

    #[test]
    fn test_resolve_unknown_interface_fails() {
        let registry = registry();
        let err = registry.resolve::<Clock>("Clock").unwrap_err();
        assert!(matches!(err, Error::RegistryResolutionFailed(_)));
    }

    #[test]
    fn test_resolve_wrong_type_fails() {
        let registry = registry();
        registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();
        let err = registry.resolve::<Logger>("Clock").unwrap_err();
        assert!(err.to_string().contains("is not a Logger"));
    }

    #[test]
    fn test_resolve_marks_access() {
        let registry = registry();
        let id = registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();

        assert_eq!(registry.registration(id).unwrap().access_count, 0);
        registry.resolve::<Clock>("Clock").unwrap();
        registry.resolve::<Clock>("Clock").unwrap();

        let registration = registry.registration(id).unwrap();
        assert_eq!(registration.access_count, 2);
        assert!(registration.last_accessed_at.is_some());
    }

    #[test]
    fn test_first_registration_wins_resolution() {
        let registry = registry();
        registry
            .register_named_instance(
                "Clock",
                "first",
                Arc::new(Clock { ticks: 1 }),
                InjectionScope::Global,
                None,
            )
            .unwrap();
        registry
            .register_named_instance(
                "Clock",
                "second",
                Arc::new(Clock { ticks: 2 }),
                InjectionScope::Global,
                None,
            )
            .unwrap();

        assert_eq!(registry.resolve::<Clock>("Clock").unwrap().ticks, 1);
        assert_eq!(
            registry.resolve_named::<Clock>("Clock", "second").unwrap().ticks,
            2
        );
    }

    #[test]
    fn test_resolve_all_preserves_order() {
        let registry = registry();
        for (name, ticks) in [("a", 1), ("b", 2), ("c", 3)] {
            registry
                .register_named_instance(
                    "Clock",
                    name,
                    Arc::new(Clock { ticks }),
                    InjectionScope::Global,
                    None,
                )
                .unwrap();
        }

        let handles = registry.resolve_all_handles("Clock").unwrap();
        let ticks: Vec<u64> = handles
            .into_iter()
            .map(|h| h.downcast::<Clock>().unwrap().ticks)
            .collect();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_name_fails_and_counts() {
        let registry = registry();
        registry
            .register_named_instance(
                "Clock",
                "clock",
                Arc::new(Clock { ticks: 1 }),
                InjectionScope::Global,
                None,
            )
            .unwrap();
        let err = registry
            .register_named_instance(
                "Clock",
                "clock",
                Arc::new(Clock { ticks: 2 }),
                InjectionScope::Global,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::RegistryResolutionFailed(_)));
        assert_eq!(registry.status().failed_registrations, 1);
        assert_eq!(registry.status().status, RegistryOperationStatus::Failed);
    }

    #[test]
    fn test_lazy_singleton_resolution_fails_without_instance() {
        let registry = registry();
        registry
            .register_service::<Clock, _>(
                "Clock",
                "LazyClock",
                ServiceLifecycle::Singleton,
                InjectionScope::Global,
                None,
                || Clock { ticks: 0 },
            )
            .unwrap();
        let err = registry.resolve::<Clock>("Clock").unwrap_err();
        assert!(err.to_string().contains("singleton instance not found"));
    }

    #[test]
    fn test_eager_singleton_resolves() {
        let registry = ServiceRegistry::new(RegistryConfig {
            lazy_loading: false,
            ..Default::default()
        });
        registry
            .register_service::<Clock, _>(
                "Clock",
                "EagerClock",
                ServiceLifecycle::Singleton,
                InjectionScope::Global,
                None,
                || Clock { ticks: 42 },
            )
            .unwrap();
        assert_eq!(registry.resolve::<Clock>("Clock").unwrap().ticks, 42);
    }

    #[test]
    fn test_transient_resolution_not_implemented() {
        let registry = registry();
        registry
            .register_service::<Clock, _>(
                "Clock",
                "TransientClock",
                ServiceLifecycle::Transient,
                InjectionScope::Global,
                None,
                || Clock { ticks: 0 },
            )
            .unwrap();
        let err = registry.resolve::<Clock>("Clock").unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_register_factory_not_implemented() {
        let registry = registry();
        let err = registry
            .register_factory("Clock", ServiceLifecycle::Transient, InjectionScope::Global)
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_unregister_disposes_instances() {
        let registry = registry();
        let id = registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.resolve::<Clock>("Clock").is_err());
        assert!(registry.active_instances(None).is_empty());
    }

    #[test]
    fn test_dispose_instances_drops_from_list() {
        let registry = registry();
        let id = registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();

        assert_eq!(registry.dispose_instances(id, None), 1);
        assert_eq!(registry.dispose_instances(id, None), 0);
        // Disposed instances are never returned from resolve.
        assert!(registry.resolve::<Clock>("Clock").is_err());
    }

    #[test]
    fn test_dispose_instances_scope_filter() {
        let registry = registry();
        let id = registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();
        assert_eq!(registry.dispose_instances(id, Some(InjectionScope::Request)), 0);
        assert_eq!(registry.dispose_instances(id, Some(InjectionScope::Global)), 1);
    }

    #[test]
    fn test_try_resolve_never_raises() {
        let registry = registry();
        assert!(registry.try_resolve::<Clock>("Clock").is_none());
    }

    #[test]
    fn test_update_configuration_touches_modified_at() {
        let registry = registry();
        let id = registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();
        let before = registry.registration(id).unwrap().metadata.last_modified_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut update = Map::new();
        update.insert("tick_rate".to_string(), Value::from(100));
        assert!(registry.update_configuration(id, update));

        let metadata = registry.registration(id).unwrap().metadata;
        assert_eq!(metadata.configuration["tick_rate"], Value::from(100));
        assert!(metadata.last_modified_at > before);
    }

    #[test]
    fn test_status_snapshot() {
        let registry = registry();
        assert_eq!(registry.status().status, RegistryOperationStatus::Pending);

        registry
            .register_instance("Clock", Arc::new(Clock { ticks: 1 }), InjectionScope::Global, None)
            .unwrap();
        registry.resolve::<Clock>("Clock").unwrap();

        let status = registry.status();
        assert_eq!(status.status, RegistryOperationStatus::Success);
        assert_eq!(status.registration_count, 1);
        assert_eq!(status.active_instances, 1);
        assert_eq!(status.lifecycle_distribution["singleton"], 1);
        assert_eq!(status.scope_distribution["global"], 1);
        assert!(status.avg_resolution_time_ms.is_some());
    }
}
