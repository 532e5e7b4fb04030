//! Registry of named scalar functions (CONCAT, geo/ISP lookups, custom functions).
//!
//! The registry is built once at start-up and handed to the query compiler, which
//! resolves every function call against it. Unknown names fail compilation.

use super::Expr;
use crate::error::DbError;
use crate::types::Scalar;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(e) => n == *e,
            Arity::AtLeast(min) => n >= *min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

type ScalarFn = dyn Fn(&[Scalar]) -> Scalar + Send + Sync;

/// A registered function: name, arity and implementation.
pub struct FunctionDef {
    name: String,
    arity: Arity,
    eval: Box<ScalarFn>,
}

impl FunctionDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn call(&self, args: &[Scalar]) -> Scalar {
        (self.eval)(args)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

// Functions are identified by name; two registries registering the same name are
// expected to agree on behavior.
impl PartialEq for FunctionDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arity == other.arity
    }
}

#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FunctionDef>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with RAND, CONCAT, LOWER, UPPER and LEN.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("RAND", Arity::Exact(0), |_| {
            Scalar::Float(rand::thread_rng().gen::<f64>())
        });
        registry.register("CONCAT", Arity::AtLeast(1), concat);
        registry.register("LOWER", Arity::Exact(1), |args| {
            map_string(&args[0], |s| s.to_lowercase())
        });
        registry.register("UPPER", Arity::Exact(1), |args| {
            map_string(&args[0], |s| s.to_uppercase())
        });
        registry.register("LEN", Arity::Exact(1), |args| match &args[0] {
            Scalar::Null => Scalar::Null,
            other => Scalar::Float(other.to_string().chars().count() as f64),
        });
        registry
    }

    /// Registers (or replaces) a function. Names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, arity: Arity, eval: F)
    where
        F: Fn(&[Scalar]) -> Scalar + Send + Sync + 'static,
    {
        let name = name.trim().to_uppercase();
        self.functions.insert(
            name.clone(),
            Arc::new(FunctionDef {
                name,
                arity,
                eval: Box::new(eval),
            }),
        );
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.functions.get(&name.trim().to_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Builds a call expression, checking that `name` is registered and accepts
    /// `args.len()` arguments.
    pub fn call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, DbError> {
        let func = self
            .lookup(name)
            .ok_or_else(|| DbError::UnknownFunction(name.to_string()))?;
        if !func.arity.accepts(args.len()) {
            return Err(DbError::TypeMismatch(format!(
                "{} takes {} argument(s), got {}",
                func.name,
                func.arity,
                args.len()
            )));
        }
        Ok(Expr::Function { func, args })
    }
}

/// CONCAT(separator, a, b, ...) joins the non-null arguments with the separator.
fn concat(args: &[Scalar]) -> Scalar {
    let sep = match &args[0] {
        Scalar::Null => String::new(),
        other => other.to_string(),
    };
    let parts: Vec<String> = args[1..]
        .iter()
        .filter(|a| !a.is_null())
        .map(|a| a.to_string())
        .collect();
    Scalar::Str(parts.join(&sep))
}

fn map_string(arg: &Scalar, f: impl Fn(&str) -> String) -> Scalar {
    match arg {
        Scalar::Null => Scalar::Null,
        Scalar::Str(s) => Scalar::Str(f(s)),
        other => Scalar::Str(f(&other.to_string())),
    }
}
