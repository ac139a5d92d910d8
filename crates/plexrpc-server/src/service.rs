//! Service registry: named services, their callable methods and the
//! "Type.Method" lookup the dispatcher resolves requests against.
//!
//! Methods are registered as typed closures with a fixed shape, the
//! compile-time rendition of signature validation: two inputs (arguments by
//! value, reply mutated in place) and one success/failure output. A function
//! that does not match the shape cannot be registered at all. Argument and
//! reply values cross the registry boundary as type-erased
//! [`serde_json::Value`] holders and are converted at the edge of each
//! invocation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use plexrpc_common::{PlexError, Result};

/// Failure signal returned by a registered method.
///
/// Carried back to the caller in the response header's error field; it is an
/// application-level outcome and never affects the connection.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct MethodError(pub String);

impl From<String> for MethodError {
    fn from(msg: String) -> Self {
        MethodError(msg)
    }
}

impl From<&str> for MethodError {
    fn from(msg: &str) -> Self {
        MethodError(msg.to_string())
    }
}

pub type MethodResult = std::result::Result<(), MethodError>;

type Handler = Box<dyn Fn(Value, &mut Value) -> MethodResult + Send + Sync>;
type HolderFactory = Box<dyn Fn() -> Value + Send + Sync>;

/// One registered method: its erased invoke closure, the factories producing
/// zero-valued argument/reply holders, and the invocation counter.
pub struct MethodType {
    name: String,
    handler: Handler,
    argv_factory: HolderFactory,
    replyv_factory: HolderFactory,
    num_calls: AtomicU64,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zero-valued argument holder.
    pub fn new_argv(&self) -> Value {
        (self.argv_factory)()
    }

    /// Zero-valued reply holder.
    ///
    /// Built from the reply type's `Default`, so container fields start out
    /// as empty (never absent) maps and vectors that methods can populate
    /// directly.
    pub fn new_replyv(&self) -> Value {
        (self.replyv_factory)()
    }

    /// Times this method has been dispatched.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}

/// A named set of callable methods.
///
/// Built once at registration time and read-only afterwards, apart from each
/// method's call counter.
///
/// # Example
///
/// ```
/// use plexrpc_server::Service;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Default)]
/// struct SumArgs {
///     num: i64,
///     num2: i64,
/// }
///
/// let service = Service::new("Foo").method("Sum", |args: SumArgs, reply: &mut i64| {
///     *reply = args.num + args.num2;
///     Ok(())
/// });
/// assert_eq!(service.method_count(), 1);
/// ```
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Service {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a method under `name`, consuming and returning the service
    /// so registrations chain.
    ///
    /// The handler receives the decoded arguments by value and mutates the
    /// reply in place; returning `Err` carries the message back to the caller
    /// in the response header. Argument values that fail to decode into `A`
    /// surface the same way.
    pub fn method<A, R, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Serialize + Default + 'static,
        R: DeserializeOwned + Serialize + Default + 'static,
        F: Fn(A, &mut R) -> MethodResult + Send + Sync + 'static,
    {
        let name = name.into();
        let erased = Box::new(move |argv: Value, replyv: &mut Value| -> MethodResult {
            let args: A = serde_json::from_value(argv)
                .map_err(|e| MethodError(format!("invalid argument: {e}")))?;
            let mut reply: R =
                serde_json::from_value(replyv.take()).unwrap_or_default();
            handler(args, &mut reply)?;
            *replyv = serde_json::to_value(reply)
                .map_err(|e| MethodError(format!("invalid reply: {e}")))?;
            Ok(())
        });
        let method = MethodType {
            name: name.clone(),
            handler: erased,
            argv_factory: Box::new(|| {
                serde_json::to_value(A::default()).unwrap_or(Value::Null)
            }),
            replyv_factory: Box::new(|| {
                serde_json::to_value(R::default()).unwrap_or(Value::Null)
            }),
            num_calls: AtomicU64::new(0),
        };
        self.methods.insert(name, Arc::new(method));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<MethodType>> {
        self.methods.get(name)
    }

    /// Invokes `method` with the erased argument and reply holders.
    ///
    /// The invocation counter is bumped exactly once per dispatch, before the
    /// handler runs. The handler's failure signal is returned as the call's
    /// error; on failure the reply holder's content is unspecified and the
    /// dispatcher discards it.
    pub fn call(&self, method: &MethodType, argv: Value, replyv: &mut Value) -> MethodResult {
        method.num_calls.fetch_add(1, Ordering::SeqCst);
        (method.handler)(argv, replyv)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry mapping service names to services, shared read-mostly by every
/// connection the server dispatches for.
#[derive(Default)]
pub struct ServiceMap {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        ServiceMap::default()
    }

    /// Adds a service; registering the same name twice is an error.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = write_lock(&self.services);
        if services.contains_key(service.name()) {
            return Err(PlexError::Service(format!(
                "service already registered: {}",
                service.name()
            )));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves a `"Type.Method"` name, splitting on the last `.`.
    ///
    /// A missing separator, unknown service or unknown method is a reportable
    /// error answered to the caller, never a panic.
    pub fn find(&self, method: &str) -> Result<(Arc<Service>, Arc<MethodType>)> {
        let (service_name, method_name) = method.rsplit_once('.').ok_or_else(|| {
            PlexError::Service(format!("ill-formed method name: {method}"))
        })?;
        let services = read_lock(&self.services);
        let service = services
            .get(service_name)
            .cloned()
            .ok_or_else(|| PlexError::Service(format!("unknown service: {service_name}")))?;
        let method = service
            .get(method_name)
            .cloned()
            .ok_or_else(|| {
                PlexError::Service(format!("unknown method: {service_name}.{method_name}"))
            })?;
        Ok((service, method))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Default)]
    struct SumArgs {
        num: i64,
        num2: i64,
    }

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Tally {
        total: i64,
        seen: Vec<i64>,
    }

    fn foo() -> Service {
        Service::new("Foo").method("Sum", |args: SumArgs, reply: &mut i64| {
            *reply = args.num + args.num2;
            Ok(())
        })
    }

    #[test]
    fn registers_exactly_one_method() {
        let service = foo();
        assert_eq!(service.method_count(), 1);
        assert!(service.get("Sum").is_some());
        assert!(service.get("sum").is_none());
    }

    #[test]
    fn call_sums_and_counts() {
        let service = foo();
        let method = service.get("Sum").unwrap().clone();

        let argv = serde_json::to_value(SumArgs { num: 1, num2: 17 }).unwrap();
        let mut replyv = method.new_replyv();
        service.call(&method, argv, &mut replyv).unwrap();

        assert_eq!(replyv, json!(18));
        assert_eq!(method.num_calls(), 1);
    }

    #[test]
    fn holders_start_zero_valued() {
        let service = Service::new("Foo").method("Tally", |args: SumArgs, reply: &mut Tally| {
            reply.total = args.num + args.num2;
            reply.seen.push(args.num);
            reply.seen.push(args.num2);
            Ok(())
        });
        let method = service.get("Tally").unwrap();

        assert_eq!(method.new_argv(), json!({"num": 0, "num2": 0}));
        // container fields are present and empty, ready to be populated
        assert_eq!(method.new_replyv(), json!({"total": 0, "seen": []}));

        let mut replyv = method.new_replyv();
        service
            .call(method, json!({"num": 2, "num2": 3}), &mut replyv)
            .unwrap();
        assert_eq!(replyv, json!({"total": 5, "seen": [2, 3]}));
    }

    #[test]
    fn undecodable_argument_is_a_method_error() {
        let service = foo();
        let method = service.get("Sum").unwrap().clone();

        let mut replyv = method.new_replyv();
        let err = service
            .call(&method, json!("not an args struct"), &mut replyv)
            .unwrap_err();
        assert!(err.0.contains("invalid argument"));
        assert_eq!(method.num_calls(), 1);
    }

    #[test]
    fn method_error_propagates() {
        let service = Service::new("Foo").method("Fail", |_: SumArgs, _: &mut i64| {
            Err(MethodError::from("arithmetic refused"))
        });
        let method = service.get("Fail").unwrap().clone();

        let mut replyv = method.new_replyv();
        let err = service
            .call(&method, json!({"num": 0, "num2": 0}), &mut replyv)
            .unwrap_err();
        assert_eq!(err, MethodError::from("arithmetic refused"));
    }

    #[test]
    fn lookup_splits_on_last_separator() {
        let map = ServiceMap::new();
        map.register(foo()).unwrap();

        assert!(map.find("Foo.Sum").is_ok());
        assert!(matches!(map.find("Foo.Missing"), Err(PlexError::Service(_))));
        assert!(matches!(map.find("Bar.Sum"), Err(PlexError::Service(_))));
        assert!(matches!(map.find("NoSeparator"), Err(PlexError::Service(_))));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let map = ServiceMap::new();
        map.register(foo()).unwrap();
        assert!(matches!(map.register(foo()), Err(PlexError::Service(_))));
    }
}
