//! Tool catalog and handler registry.
//!
//! The [`ToolCatalog`] is the process-wide, read-only list of tool
//! descriptors. The host uses it to validate client methods; the browser
//! side pairs each descriptor with a [`ToolHandler`] in a
//! [`HandlerRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use browser_bridge::registry::{HandlerRegistry, handler_fn};
//! use browser_bridge::protocol::ToolResult;
//!
//! let mut registry = HandlerRegistry::builtin();
//! registry.register_builtin("navigate", handler_fn(|args| async move {
//!     Ok(ToolResult::text(format!("opened {}", args["url"])))
//! }))?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builtin` | Built-in browser tool descriptors |
//! | `shape` | Declared argument shapes |

// ============================================================================
// Submodules
// ============================================================================

/// Built-in browser tool descriptors.
pub mod builtin;

/// Declared argument shapes.
pub mod shape;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::ToolResult;

// ============================================================================
// Re-exports
// ============================================================================

pub use shape::{ArgumentShape, FieldKind, FieldSpec};

// ============================================================================
// ExecutionContext
// ============================================================================

/// Where inside the browser a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// Extension background worker.
    Background,
    /// Script injected into the page.
    ContentScript,
    /// Isolated offscreen document.
    Offscreen,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Background => "background",
            Self::ContentScript => "content_script",
            Self::Offscreen => "offscreen",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ToolDescriptor
// ============================================================================

/// Static description of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within a catalog.
    pub name: String,
    /// Execution context.
    pub context: ExecutionContext,
    /// Human-readable summary.
    pub description: String,
    /// Accepted arguments.
    #[serde(rename = "arguments")]
    pub shape: ArgumentShape,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        context: ExecutionContext,
        description: impl Into<String>,
        shape: ArgumentShape,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            description: description.into(),
            shape,
        }
    }
}

// ============================================================================
// ToolCatalog
// ============================================================================

/// Immutable set of tool descriptors keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: FxHashMap<String, Arc<ToolDescriptor>>,
}

impl ToolCatalog {
    /// Builds a catalog from descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two descriptors share a name.
    pub fn new(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Result<Self> {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            catalog.insert(descriptor)?;
        }
        Ok(catalog)
    }

    /// Returns the built-in browser catalog.
    #[must_use]
    pub fn builtin() -> Self {
        let tools = builtin::descriptors()
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), Arc::new(descriptor)))
            .collect();
        Self { tools }
    }

    fn insert(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(Error::config(format!(
                "tool '{}' registered twice",
                descriptor.name
            )));
        }
        self.tools
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Returns `true` if `name` is a known tool.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Looks up a descriptor.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.tools.get(name)
    }

    /// Returns the number of tools.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if the catalog is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns all descriptors sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        let mut all: Vec<_> = self.tools.values().map(AsRef::as_ref).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Serializes the catalog as `{"tools": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::json!({ "tools": serde_json::to_value(self.list())? }))
    }
}

// ============================================================================
// ToolHandler
// ============================================================================

/// Executes one tool.
///
/// Returning `Err` or an `isError` result are equivalent from the caller's
/// point of view: both reach the client as a dispatch error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with already validated arguments.
    async fn execute(&self, args: Value) -> Result<ToolResult>;
}

/// Handler backed by a closure.
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync,
{
    async fn execute(&self, args: Value) -> Result<ToolResult> {
        (self.f)(args).await
    }
}

/// Adapts an async closure into a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: move |args| -> BoxFuture<'static, Result<ToolResult>> { Box::pin(f(args)) },
    })
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// A registered tool: descriptor plus handler.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Static description.
    pub descriptor: Arc<ToolDescriptor>,
    /// Executor.
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Maps tool names to handlers on the browser side.
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    /// Known descriptors, handler or not.
    catalog: ToolCatalog,
    /// Tools with a handler attached.
    handlers: FxHashMap<String, RegisteredTool>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that knows the built-in descriptors but has no
    /// handlers yet.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            catalog: ToolCatalog::builtin(),
            handlers: FxHashMap::default(),
        }
    }

    /// Registers a new tool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is already registered.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        self.catalog.insert(descriptor)?;
        self.attach(&name, handler)
    }

    /// Attaches a handler to a descriptor already in the catalog.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTool`] if the catalog has no such descriptor
    /// - [`Error::Config`] if a handler is already attached
    pub fn register_builtin(&mut self, name: &str, handler: Arc<dyn ToolHandler>) -> Result<()> {
        if !self.catalog.contains(name) {
            return Err(Error::unknown_tool(name));
        }
        self.attach(name, handler)
    }

    fn attach(&mut self, name: &str, handler: Arc<dyn ToolHandler>) -> Result<()> {
        if self.handlers.contains_key(name) {
            return Err(Error::config(format!("handler for '{name}' registered twice")));
        }
        let Some(descriptor) = self.catalog.get(name).cloned() else {
            return Err(Error::unknown_tool(name));
        };

        debug!(tool = name, context = %descriptor.context, "Registered tool handler");
        self.handlers
            .insert(name.to_string(), RegisteredTool { descriptor, handler });
        Ok(())
    }

    /// Looks up a tool with a handler.
    #[inline]
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.handlers.get(name)
    }

    /// Returns the descriptor catalog.
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Returns the number of tools with a handler.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
