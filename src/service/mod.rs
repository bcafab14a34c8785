//! Services: named groups of methods sharing one receiver.
//!
//! A [`Service`] is built once with [`ServiceBuilder`] and then registered on
//! a server. Methods are plain functions taking the receiver, an argument
//! and a reply slot:
//!
//! ```
//! use wirerpc::service::ServiceBuilder;
//!
//! #[derive(serde::Deserialize)]
//! struct Args {
//!     num1: i32,
//!     num2: i32,
//! }
//!
//! struct Foo;
//!
//! impl Foo {
//!     fn sum(&self, args: Args, reply: &mut i32) -> Result<(), String> {
//!         *reply = args.num1 + args.num2;
//!         Ok(())
//!     }
//! }
//!
//! let service = ServiceBuilder::new("Foo", Foo)
//!     .method("Sum", Foo::sum)
//!     .build()
//!     .unwrap();
//! assert!(service.method("Sum").is_some());
//! ```

mod method;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use method::{Handler, Invocation, MethodType, TypedMethod};

use crate::error::{Result, RpcError};

/// A named set of methods, immutable once built.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Start building a service named `name` around `receiver`.
    pub fn builder<T: Send + Sync + 'static>(name: &str, receiver: T) -> ServiceBuilder<T> {
        ServiceBuilder::new(name, receiver)
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Arc<MethodType>> {
        self.methods.get(name)
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Always false for a built service.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Snapshot of method metadata and call counts, sorted by method name.
    pub fn stats(&self) -> ServiceStats {
        let mut methods: Vec<MethodStats> = self
            .methods
            .values()
            .map(|m| MethodStats {
                name: m.name().to_string(),
                arg_type: m.arg_type().to_string(),
                reply_type: m.reply_type().to_string(),
                num_calls: m.num_calls(),
            })
            .collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));

        ServiceStats {
            name: self.name.clone(),
            methods,
        }
    }
}

/// Fluent builder for [`Service`].
///
/// Registration errors are remembered and reported by [`build`](Self::build),
/// so the chain never breaks.
pub struct ServiceBuilder<T> {
    name: String,
    receiver: Arc<T>,
    methods: HashMap<String, Arc<MethodType>>,
    error: Option<RpcError>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Create a builder owning `receiver`.
    pub fn new(name: &str, receiver: T) -> Self {
        Self::with_shared(name, Arc::new(receiver))
    }

    /// Create a builder around a receiver that is shared elsewhere.
    pub fn with_shared(name: &str, receiver: Arc<T>) -> Self {
        let error = validate_name(name).err();
        Self {
            name: name.to_string(),
            receiver,
            methods: HashMap::new(),
            error,
        }
    }

    /// Register `method` under `name`.
    ///
    /// `A` is decoded from the request body, `R` starts as `R::default()` and
    /// is encoded as the response body if the method returns `Ok`. An `Err`
    /// is sent back as its `Display` text.
    pub fn method<F, A, R, E>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&T, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + 'static,
        E: Display + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = validate_name(name) {
            self.error = Some(e);
            return self;
        }
        if self.methods.contains_key(name) {
            self.error = Some(RpcError::DuplicateMethod(format!("{}.{}", self.name, name)));
            return self;
        }

        let handler = TypedMethod::new(Arc::clone(&self.receiver), method);
        let entry = MethodType::new::<A, R>(name.to_string(), Box::new(handler));
        self.methods.insert(name.to_string(), Arc::new(entry));
        self
    }

    /// Finish the service.
    ///
    /// # Errors
    ///
    /// The first naming error seen while building, or `NoMethods` if no
    /// method was registered.
    pub fn build(self) -> Result<Service> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.methods.is_empty() {
            return Err(RpcError::NoMethods(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// Names must look like exported identifiers: an uppercase letter followed by
/// letters, digits or underscores. A dot would break `Service.Method`.
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_uppercase() && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RpcError::InvalidName(name.to_string()))
    }
}

/// Serializable view of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub name: String,
    pub methods: Vec<MethodStats>,
}

/// Serializable view of one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodStats {
    pub name: String,
    pub arg_type: String,
    pub reply_type: String,
    pub num_calls: u64,
}
