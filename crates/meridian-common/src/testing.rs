//! In-memory [`ResourceClient`] for tests
//!
//! Behaves like a tiny API server: assigns uids and resourceVersions,
//! rejects duplicate creates and stale updates, and filters lists by
//! namespace and label selector. Failures can be injected per operation and
//! resource family to drive rollback paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use parking_lot::Mutex;

use crate::crd::{
    AiGatewayRoute, BackendTrafficPolicy, Condition, HttpRoute, InferenceService,
    InferenceServiceStatus, CONDITION_READY,
};
use crate::kube_utils::{selector_matches, HasApiResource, HasMetadata};
use crate::resources::{ResourceClient, ResourceError, Selection, SECRET_KIND};

/// Resource client operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// get
    Get,
    /// list
    List,
    /// create
    Create,
    /// update
    Update,
    /// delete
    Delete,
}

impl Op {
    fn is_mutation(&self) -> bool {
        matches!(self, Op::Create | Op::Update | Op::Delete)
    }
}

/// Resource family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// KServe InferenceService
    InferenceService,
    /// Gateway API HTTPRoute
    HttpRoute,
    /// Envoy AI Gateway AIGatewayRoute
    AiGatewayRoute,
    /// Envoy Gateway BackendTrafficPolicy
    TrafficPolicy,
    /// Core Secret
    Secret,
}

type Key = (String, String);
type Store<T> = BTreeMap<Key, T>;

struct Injected {
    op: Op,
    family: Family,
    error: ResourceError,
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    inference_services: Store<InferenceService>,
    http_routes: Store<HttpRoute>,
    ai_gateway_routes: Store<AiGatewayRoute>,
    traffic_policies: Store<BackendTrafficPolicy>,
    secrets: Store<Secret>,
    counter: u64,
    failures: Vec<Injected>,
    calls: Vec<(Op, Family)>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn record(&mut self, op: Op, family: Family) -> Result<(), ResourceError> {
        self.calls.push((op, family));
        let Some(idx) = self
            .failures
            .iter()
            .position(|f| f.op == op && f.family == family)
        else {
            return Ok(());
        };
        let injected = &mut self.failures[idx];
        let error = injected.error.clone();
        let exhausted = match injected.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            self.failures.remove(idx);
        }
        Err(error)
    }
}

/// Uniform access to the bits of metadata the fake server manages
trait Stored: Clone {
    const FAMILY: Family;
    const KIND_NAME: &'static str;
    fn name(&self) -> String;
    fn set_namespace(&mut self, namespace: &str);
    fn resource_version(&self) -> Option<String>;
    fn uid(&self) -> Option<String>;
    fn stamp(&mut self, uid: String, resource_version: String);
    fn matches(&self, selector: &str) -> bool;
    fn store(state: &mut State) -> &mut Store<Self>;
}

macro_rules! impl_stored {
    ($type:ty, $family:expr, $field:ident) => {
        impl Stored for $type {
            const FAMILY: Family = $family;
            const KIND_NAME: &'static str = <$type as HasApiResource>::KIND;
            fn name(&self) -> String {
                self.meta().name.clone()
            }
            fn set_namespace(&mut self, namespace: &str) {
                self.meta_mut().namespace = namespace.to_string();
            }
            fn resource_version(&self) -> Option<String> {
                self.meta().resource_version.clone()
            }
            fn uid(&self) -> Option<String> {
                self.meta().uid.clone()
            }
            fn stamp(&mut self, uid: String, resource_version: String) {
                let meta = self.meta_mut();
                meta.uid = Some(uid);
                meta.resource_version = Some(resource_version);
            }
            fn matches(&self, selector: &str) -> bool {
                selector_matches(selector, &self.meta().labels)
            }
            fn store(state: &mut State) -> &mut Store<Self> {
                &mut state.$field
            }
        }
    };
}

impl_stored!(InferenceService, Family::InferenceService, inference_services);
impl_stored!(HttpRoute, Family::HttpRoute, http_routes);
impl_stored!(AiGatewayRoute, Family::AiGatewayRoute, ai_gateway_routes);
impl_stored!(BackendTrafficPolicy, Family::TrafficPolicy, traffic_policies);

impl Stored for Secret {
    const FAMILY: Family = Family::Secret;
    const KIND_NAME: &'static str = SECRET_KIND;
    fn name(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }
    fn set_namespace(&mut self, namespace: &str) {
        self.metadata.namespace = Some(namespace.to_string());
    }
    fn resource_version(&self) -> Option<String> {
        self.metadata.resource_version.clone()
    }
    fn uid(&self) -> Option<String> {
        self.metadata.uid.clone()
    }
    fn stamp(&mut self, uid: String, resource_version: String) {
        self.metadata.uid = Some(uid);
        self.metadata.resource_version = Some(resource_version);
    }
    fn matches(&self, selector: &str) -> bool {
        selector_matches(selector, &self.metadata.labels.clone().unwrap_or_default())
    }
    fn store(state: &mut State) -> &mut Store<Self> {
        &mut state.secrets
    }
}

/// Fake cluster API server holding resources in memory
#[derive(Default)]
pub struct InMemoryResourceClient {
    state: Mutex<State>,
}

impl InMemoryResourceClient {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every matching call with `error` until cleared
    pub fn fail(&self, op: Op, family: Family, error: ResourceError) {
        self.state.lock().failures.push(Injected {
            op,
            family,
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` matching calls with `error`
    pub fn fail_times(&self, op: Op, family: Family, error: ResourceError, times: u32) {
        self.state.lock().failures.push(Injected {
            op,
            family,
            error,
            remaining: Some(times),
        });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Number of calls made for an operation and family
    pub fn calls(&self, op: Op, family: Family) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(o, f)| *o == op && *f == family)
            .count()
    }

    /// Number of create/update/delete calls across all families
    pub fn mutations(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(o, _)| o.is_mutation())
            .count()
    }

    /// Seed an InferenceService without recording a call
    pub fn insert_inference_service(&self, mut isvc: InferenceService) {
        let mut state = self.state.lock();
        let n = state.next();
        isvc.stamp(format!("uid-{}", n), n.to_string());
        let key = (isvc.metadata.namespace.clone(), isvc.metadata.name.clone());
        state.inference_services.insert(key, isvc);
    }

    /// Mark an InferenceService Ready with the given external URL
    pub fn set_ready(&self, namespace: &str, name: &str, url: &str) {
        self.set_condition(namespace, name, "True", None, Some(url.to_string()));
    }

    /// Mark an InferenceService not Ready
    pub fn set_not_ready(&self, namespace: &str, name: &str, message: &str) {
        self.set_condition(namespace, name, "False", Some(message.to_string()), None);
    }

    fn set_condition(
        &self,
        namespace: &str,
        name: &str,
        status: &str,
        message: Option<String>,
        url: Option<String>,
    ) {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        if let Some(isvc) = state.inference_services.get_mut(&key) {
            isvc.status = Some(InferenceServiceStatus {
                url,
                conditions: vec![Condition {
                    type_: CONDITION_READY.to_string(),
                    status: status.to_string(),
                    reason: None,
                    message,
                }],
                ..Default::default()
            });
        }
    }

    /// Snapshot of stored InferenceServices
    pub fn inference_services(&self) -> Vec<InferenceService> {
        self.state.lock().inference_services.values().cloned().collect()
    }

    /// Snapshot of stored HTTPRoutes
    pub fn http_routes(&self) -> Vec<HttpRoute> {
        self.state.lock().http_routes.values().cloned().collect()
    }

    /// Snapshot of stored AIGatewayRoutes
    pub fn ai_gateway_routes(&self) -> Vec<AiGatewayRoute> {
        self.state.lock().ai_gateway_routes.values().cloned().collect()
    }

    /// Snapshot of stored BackendTrafficPolicies
    pub fn traffic_policies(&self) -> Vec<BackendTrafficPolicy> {
        self.state.lock().traffic_policies.values().cloned().collect()
    }

    /// Snapshot of stored Secrets
    pub fn secrets(&self) -> Vec<Secret> {
        self.state.lock().secrets.values().cloned().collect()
    }

    fn get<T: Stored>(&self, op: Op, namespace: &str, name: &str) -> Result<T, ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.record(op, T::FAMILY)?;
        T::store(state)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                kind: T::KIND_NAME,
                name: name.to_string(),
            })
    }

    fn list<T: Stored>(&self, selection: &Selection) -> Result<Vec<T>, ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.record(Op::List, T::FAMILY)?;
        Ok(T::store(state)
            .iter()
            .filter(|((ns, _), _)| selection.namespace.as_deref().map_or(true, |want| want == ns))
            .filter(|(_, r)| selection.labels.as_deref().map_or(true, |sel| r.matches(sel)))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn create<T: Stored>(&self, namespace: &str, resource: &T) -> Result<T, ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.record(Op::Create, T::FAMILY)?;
        let key = (namespace.to_string(), resource.name());
        if T::store(state).contains_key(&key) {
            return Err(ResourceError::AlreadyExists {
                kind: T::KIND_NAME,
                name: key.1,
            });
        }
        let n = state.next();
        let mut created = resource.clone();
        created.set_namespace(namespace);
        created.stamp(format!("uid-{}", n), n.to_string());
        T::store(state).insert(key, created.clone());
        Ok(created)
    }

    fn update<T: Stored>(&self, namespace: &str, resource: &T) -> Result<T, ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.record(Op::Update, T::FAMILY)?;
        let key = (namespace.to_string(), resource.name());
        let Some(existing) = T::store(state).get(&key) else {
            return Err(ResourceError::NotFound {
                kind: T::KIND_NAME,
                name: key.1,
            });
        };
        if let Some(sent) = resource.resource_version() {
            if existing.resource_version().as_deref() != Some(sent.as_str()) {
                return Err(ResourceError::Conflict {
                    kind: T::KIND_NAME,
                    name: key.1,
                });
            }
        }
        let uid = existing.uid().unwrap_or_default();
        let n = state.next();
        let mut updated = resource.clone();
        updated.set_namespace(namespace);
        updated.stamp(uid, n.to_string());
        T::store(state).insert(key, updated.clone());
        Ok(updated)
    }

    fn delete<T: Stored>(&self, namespace: &str, name: &str) -> Result<(), ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.record(Op::Delete, T::FAMILY)?;
        T::store(state)
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ResourceError::NotFound {
                kind: T::KIND_NAME,
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl ResourceClient for InMemoryResourceClient {
    async fn get_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InferenceService, ResourceError> {
        self.get(Op::Get, namespace, name)
    }

    async fn list_inference_services(
        &self,
        selection: &Selection,
    ) -> Result<Vec<InferenceService>, ResourceError> {
        self.list(selection)
    }

    async fn create_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError> {
        self.create(namespace, isvc)
    }

    async fn update_inference_service(
        &self,
        namespace: &str,
        isvc: &InferenceService,
    ) -> Result<InferenceService, ResourceError> {
        self.update(namespace, isvc)
    }

    async fn delete_inference_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete::<InferenceService>(namespace, name)
    }

    async fn get_http_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<HttpRoute, ResourceError> {
        self.get(Op::Get, namespace, name)
    }

    async fn list_http_routes(
        &self,
        selection: &Selection,
    ) -> Result<Vec<HttpRoute>, ResourceError> {
        self.list(selection)
    }

    async fn create_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError> {
        self.create(namespace, route)
    }

    async fn update_http_route(
        &self,
        namespace: &str,
        route: &HttpRoute,
    ) -> Result<HttpRoute, ResourceError> {
        self.update(namespace, route)
    }

    async fn delete_http_route(&self, namespace: &str, name: &str) -> Result<(), ResourceError> {
        self.delete::<HttpRoute>(namespace, name)
    }

    async fn get_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.get(Op::Get, namespace, name)
    }

    async fn list_ai_gateway_routes(
        &self,
        selection: &Selection,
    ) -> Result<Vec<AiGatewayRoute>, ResourceError> {
        self.list(selection)
    }

    async fn create_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.create(namespace, route)
    }

    async fn update_ai_gateway_route(
        &self,
        namespace: &str,
        route: &AiGatewayRoute,
    ) -> Result<AiGatewayRoute, ResourceError> {
        self.update(namespace, route)
    }

    async fn delete_ai_gateway_route(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete::<AiGatewayRoute>(namespace, name)
    }

    async fn get_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.get(Op::Get, namespace, name)
    }

    async fn list_traffic_policies(
        &self,
        selection: &Selection,
    ) -> Result<Vec<BackendTrafficPolicy>, ResourceError> {
        self.list(selection)
    }

    async fn create_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.create(namespace, policy)
    }

    async fn update_traffic_policy(
        &self,
        namespace: &str,
        policy: &BackendTrafficPolicy,
    ) -> Result<BackendTrafficPolicy, ResourceError> {
        self.update(namespace, policy)
    }

    async fn delete_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.delete::<BackendTrafficPolicy>(namespace, name)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ResourceError> {
        self.get(Op::Get, namespace, name)
    }

    async fn list_secrets(&self, selection: &Selection) -> Result<Vec<Secret>, ResourceError> {
        self.list(selection)
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ResourceError> {
        self.create(namespace, secret)
    }

    async fn update_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ResourceError> {
        self.update(namespace, secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ResourceError> {
        self.delete::<Secret>(namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::HttpRouteSpec;
    use crate::kube_utils::ObjectMeta;

    fn route(name: &str) -> HttpRoute {
        HttpRoute::new(
            ObjectMeta::new(name, "tenant-a").with_label("meridian.dev/published", "true"),
            HttpRouteSpec::default(),
        )
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let client = InMemoryResourceClient::new();
        let created = client.create_http_route("tenant-a", &route("iris-public")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        let dup = client.create_http_route("tenant-a", &route("iris-public")).await;
        assert!(matches!(dup, Err(ResourceError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let client = InMemoryResourceClient::new();
        let created = client.create_http_route("tenant-a", &route("iris-public")).await.unwrap();
        client.update_http_route("tenant-a", &created).await.unwrap();

        // `created` still carries the first resourceVersion
        let stale = client.update_http_route("tenant-a", &created).await;
        assert!(matches!(stale, Err(ResourceError::Conflict { .. })));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let client = InMemoryResourceClient::new();
        client.fail_times(
            Op::Create,
            Family::HttpRoute,
            ResourceError::Unavailable("down".into()),
            1,
        );
        assert!(client.create_http_route("tenant-a", &route("a")).await.is_err());
        assert!(client.create_http_route("tenant-a", &route("a")).await.is_ok());
        assert_eq!(client.calls(Op::Create, Family::HttpRoute), 2);
        assert_eq!(client.mutations(), 2);
    }

    #[tokio::test]
    async fn lists_filter_by_namespace_and_labels() {
        let client = InMemoryResourceClient::new();
        client.create_http_route("tenant-a", &route("a")).await.unwrap();
        client.create_http_route("tenant-b", &route("b")).await.unwrap();
        let mut unlabelled = route("c");
        unlabelled.metadata.labels.clear();
        client.create_http_route("tenant-a", &unlabelled).await.unwrap();

        let published = client
            .list_http_routes(&Selection::all().with_labels(crate::PUBLISHED_SELECTOR))
            .await
            .unwrap();
        assert_eq!(published.len(), 2);

        let tenant_a = client
            .list_http_routes(&Selection::namespace("tenant-a"))
            .await
            .unwrap();
        assert_eq!(tenant_a.len(), 2);
    }
}
