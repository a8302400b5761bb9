//! # Schema Registry
//!
//! The IDL-derived registry a connection consults: named struct types plus
//! per-service function signatures. How the schema got here (IDL parsing,
//! code generation) is someone else's problem; this is the queryable result.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::TypeDescriptor;
use crate::structure::StructType;

/// The declared signature of one remotely callable function.
#[derive(Clone, Debug)]
pub struct FunctionSig {
    pub params: Vec<TypeDescriptor>,
    /// `None` declares a void return: the function is one-way.
    pub ret: Option<TypeDescriptor>,
}

impl FunctionSig {
    pub fn new(params: Vec<TypeDescriptor>, ret: Option<TypeDescriptor>) -> Self {
        FunctionSig { params, ret }
    }

    /// One-way functions send no reply and await none.
    pub fn is_one_way(&self) -> bool {
        self.ret.is_none()
    }
}

/// Registry of named types and service-function signatures.
#[derive(Default)]
pub struct Schema {
    types: HashMap<String, Arc<StructType>>,
    services: HashMap<String, HashMap<String, Arc<FunctionSig>>>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    /// Registers a struct type, returning the shared handle used to build
    /// descriptors referring to it.
    pub fn add_struct(&mut self, structure: StructType) -> Arc<StructType> {
        let shared = Arc::new(structure);
        self.types.insert(shared.name().to_string(), shared.clone());
        shared
    }

    pub fn get_struct(&self, name: &str) -> Option<Arc<StructType>> {
        self.types.get(name).cloned()
    }

    pub fn add_function(&mut self, service: &str, function: &str, signature: FunctionSig) {
        self.services
            .entry(service.to_string())
            .or_default()
            .insert(function.to_string(), Arc::new(signature));
    }

    /// Looks up the signature of `service.function`.
    pub fn get_service_function(
        &self,
        service: &str,
        function: &str,
    ) -> Option<Arc<FunctionSig>> {
        self.services
            .get(service)
            .and_then(|functions| functions.get(function))
            .cloned()
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }
}
