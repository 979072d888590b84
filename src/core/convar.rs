//! Console variable (ConVar) implementation.
//!
//! ConVars are typed values that can be read and changed from the console.
//! They are shared as `Arc<ConVar<T>>` and mutated through `&self`, so the
//! declaring code and the hub can hold them at the same time.

use std::any::Any;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::registry::{self, ConItem, ItemHeader};
use super::{read, write};

/// Outcome of a set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSetResult {
    Success,
    /// The string could not be parsed into the variable type.
    InvalidString,
    /// The validator refused the new value.
    CallbackRejected,
    /// The variable is locked.
    Locked,
}

impl VarSetResult {
    #[inline]
    pub fn is_success(self) -> bool {
        self == VarSetResult::Success
    }

    /// Human readable reason, used in console error messages.
    pub fn reason(self) -> &'static str {
        match self {
            VarSetResult::Success => "success",
            VarSetResult::InvalidString => "invalid string value",
            VarSetResult::CallbackRejected => "value rejected by callback",
            VarSetResult::Locked => "cvar is locked",
        }
    }
}

/// Trait for types that can be stored in a ConVar.
///
/// Implemented for `bool`, `i32`, `f32`, `f64` and `String`.
pub trait ConVarValue: Clone + PartialEq + Send + Sync + 'static {
    /// Short type name shown by `list` and `help`.
    const TYPE_TAG: &'static str;

    /// Parse a value from a string.
    fn parse(s: &str) -> Option<Self>;

    /// Format the value as a string.
    fn format(&self) -> String;
}

impl ConVarValue for bool {
    const TYPE_TAG: &'static str = "bool";

    fn parse(s: &str) -> Option<Self> {
        if let Ok(v) = s.trim().parse::<i32>() {
            return Some(v != 0);
        }
        match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    fn format(&self) -> String {
        if *self { "1".to_string() } else { "0".to_string() }
    }
}

impl ConVarValue for i32 {
    const TYPE_TAG: &'static str = "int";

    fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl ConVarValue for f32 {
    const TYPE_TAG: &'static str = "float";

    fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl ConVarValue for f64 {
    const TYPE_TAG: &'static str = "float";

    fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    fn format(&self) -> String {
        self.to_string()
    }
}

impl ConVarValue for String {
    const TYPE_TAG: &'static str = "string";

    fn parse(s: &str) -> Option<Self> {
        Some(s.to_string())
    }

    fn format(&self) -> String {
        self.clone()
    }
}

/// Type-erased view of a ConVar.
///
/// This allows storing ConVars of different types in the same registry.
pub trait ConVarDyn: Send + Sync {
    /// Name, description and registry link.
    fn header(&self) -> &ItemHeader;

    /// Get the current value as a string.
    fn get_string(&self) -> String;

    /// Parse and set the value.
    fn set_from_string(&self, s: &str) -> VarSetResult;

    /// Short type name ("bool", "int", "float" or "string").
    fn type_tag(&self) -> &'static str;

    fn is_locked(&self) -> bool;

    fn set_locked(&self, locked: bool);

    /// Get as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl dyn ConVarDyn {
    #[inline]
    pub fn name(&self) -> &str {
        self.header().name()
    }

    #[inline]
    pub fn description(&self) -> &str {
        self.header().description()
    }

    /// Downcast to a concrete ConVar.
    pub fn downcast_ref<T: ConVarValue>(&self) -> Option<&ConVar<T>> {
        self.as_any().downcast_ref::<ConVar<T>>()
    }
}

type Validator<T> = dyn Fn(&T, &T) -> bool + Send + Sync;

/// A console variable.
///
/// The stored value is always one the validator accepted. The validator is
/// called with `(old, new)` while the value is write-locked, so it must not
/// read the same variable.
///
/// # Examples
///
/// ```
/// use appfw::core::{ConVar, VarSetResult};
///
/// let max_players = ConVar::new("sv_max_players", 16i32, "Player limit")
///     .validator(|_old, new| (1..=64).contains(new));
///
/// assert_eq!(max_players.set(32), VarSetResult::Success);
/// assert_eq!(max_players.set(100), VarSetResult::CallbackRejected);
/// assert_eq!(max_players.set_from_string("abc"), VarSetResult::InvalidString);
/// assert_eq!(max_players.get(), 32);
/// ```
pub struct ConVar<T: ConVarValue> {
    header: ItemHeader,
    value: RwLock<T>,
    locked: AtomicBool,
    validator: RwLock<Option<Arc<Validator<T>>>>,
}

impl<T: ConVarValue> ConVar<T> {
    /// Create a detached ConVar. See [`ConVar::declare`] to make it visible
    /// to the console.
    pub fn new(name: impl Into<Box<str>>, default: T, description: impl Into<Box<str>>) -> Self {
        Self {
            header: ItemHeader::new(name.into(), description.into()),
            value: RwLock::new(default),
            locked: AtomicBool::new(false),
            validator: RwLock::new(None),
        }
    }

    /// Create a ConVar and register it with the process-wide console.
    ///
    /// Before the framework is initialized the variable is staged and picked
    /// up by the next [`initialize`](crate::initialize).
    pub fn declare(name: impl Into<Box<str>>, default: T, description: impl Into<Box<str>>) -> Arc<Self> {
        Self::new(name, default, description).into_declared()
    }

    /// Register an already configured ConVar with the process-wide console.
    pub fn into_declared(self) -> Arc<Self> {
        let var = Arc::new(self);
        registry::declare(ConItem::Var(var.clone()));
        var
    }

    /// Set the validator, called with `(old, new)` before every change.
    pub fn validator<F>(self, f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.set_validator(f);
        self
    }

    /// Replace the validator.
    pub fn set_validator<F>(&self, f: F)
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        *write(&self.validator) = Some(Arc::new(f));
    }

    /// Get the name.
    #[inline]
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Get the description.
    #[inline]
    pub fn description(&self) -> &str {
        self.header.description()
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        read(&self.value).clone()
    }

    /// Set the value.
    pub fn set(&self, new: T) -> VarSetResult {
        if self.is_locked() {
            return VarSetResult::Locked;
        }

        let validator = read(&self.validator).clone();
        let mut value = write(&self.value);

        if let Some(validator) = validator {
            if !validator(&value, &new) {
                return VarSetResult::CallbackRejected;
            }
        }

        *value = new;
        VarSetResult::Success
    }

    /// Parse `s` and set the value.
    pub fn set_from_string(&self, s: &str) -> VarSetResult {
        match T::parse(s) {
            Some(v) => self.set(v),
            None => VarSetResult::InvalidString,
        }
    }

    /// Format the current value.
    pub fn get_string(&self) -> String {
        read(&self.value).format()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Lock or unlock. A locked variable rejects every set.
    #[inline]
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    #[inline]
    pub fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }
}

impl<T: ConVarValue> ConVarDyn for ConVar<T> {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn get_string(&self) -> String {
        ConVar::get_string(self)
    }

    fn set_from_string(&self, s: &str) -> VarSetResult {
        ConVar::set_from_string(self, s)
    }

    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    fn is_locked(&self) -> bool {
        ConVar::is_locked(self)
    }

    fn set_locked(&self, locked: bool) {
        ConVar::set_locked(self, locked)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: ConVarValue> Drop for ConVar<T> {
    fn drop(&mut self) {
        self.header.detach();
    }
}

impl<T: ConVarValue> Display for ConVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = \"{}\" ({})", self.name(), self.get_string(), T::TYPE_TAG)?;
        if self.is_locked() {
            f.write_str(" (locked)")?;
        }
        Ok(())
    }
}

impl<T: ConVarValue + fmt::Debug> fmt::Debug for ConVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConVar")
            .field("name", &self.name())
            .field("value", &*read(&self.value))
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convar_basic() {
        let cvar = ConVar::new("test", 42i32, "A test var");
        assert_eq!(cvar.get(), 42);
        assert_eq!(cvar.name(), "test");
        assert_eq!(cvar.description(), "A test var");
        assert_eq!(cvar.type_tag(), "int");
    }

    #[test]
    fn test_convar_set() {
        let cvar = ConVar::new("test", 42i32, "");
        assert_eq!(cvar.set(100), VarSetResult::Success);
        assert_eq!(cvar.get(), 100);
    }

    #[test]
    fn test_convar_validator_rejects() {
        let cvar = ConVar::new("test", 5i32, "").validator(|old, new| new > old);

        assert_eq!(cvar.set(3), VarSetResult::CallbackRejected);
        assert_eq!(cvar.get(), 5);

        assert_eq!(cvar.set(7), VarSetResult::Success);
        assert_eq!(cvar.set_from_string("6"), VarSetResult::CallbackRejected);
        assert_eq!(cvar.get(), 7);
    }

    #[test]
    fn test_convar_locked() {
        let cvar = ConVar::new("test", 42i32, "");
        cvar.set_locked(true);

        assert_eq!(cvar.set(100), VarSetResult::Locked);
        assert_eq!(cvar.set_from_string("100"), VarSetResult::Locked);
        assert_eq!(cvar.get(), 42);

        cvar.set_locked(false);
        assert_eq!(cvar.set(100), VarSetResult::Success);
    }

    #[test]
    fn test_convar_locked_before_validator() {
        let cvar = ConVar::new("test", 1i32, "").validator(|_, _| false);
        cvar.set_locked(true);
        assert_eq!(cvar.set(2), VarSetResult::Locked);
    }

    #[test]
    fn test_convar_invalid_string() {
        let cvar = ConVar::new("test", 42i32, "");
        assert_eq!(cvar.set_from_string("forty"), VarSetResult::InvalidString);
        assert_eq!(cvar.get(), 42);
    }

    #[test]
    fn test_convar_bool() {
        let cvar = ConVar::new("enabled", true, "");
        assert_eq!(cvar.get_string(), "1");
        assert_eq!(cvar.type_tag(), "bool");

        assert_eq!(cvar.set_from_string("0"), VarSetResult::Success);
        assert!(!cvar.get());
        assert_eq!(cvar.get_string(), "0");

        assert_eq!(cvar.set_from_string("5"), VarSetResult::Success);
        assert!(cvar.get());

        assert_eq!(bool::parse("false"), Some(false));
        assert_eq!(bool::parse("maybe"), None);
    }

    #[test]
    fn test_convar_float() {
        let cvar = ConVar::new("ratio", 0.5f32, "");
        assert_eq!(cvar.get_string(), "0.5");
        assert_eq!(cvar.type_tag(), "float");

        let cvar = ConVar::new("gravity", 800.0f64, "");
        assert_eq!(cvar.get_string(), "800");
        assert_eq!(cvar.set_from_string("9.81"), VarSetResult::Success);
        assert_eq!(cvar.get(), 9.81);
    }

    #[test]
    fn test_convar_string() {
        let cvar = ConVar::new("sv_name", String::from("server"), "");
        assert_eq!(cvar.set_from_string("my server"), VarSetResult::Success);
        assert_eq!(cvar.get(), "my server");
        assert_eq!(cvar.type_tag(), "string");
    }

    #[test]
    fn test_convar_dyn() {
        let cvar: Arc<dyn ConVarDyn> = Arc::new(ConVar::new("test", 42i32, "desc"));
        assert_eq!(cvar.get_string(), "42");
        assert_eq!(cvar.name(), "test");
        assert_eq!(cvar.set_from_string("7"), VarSetResult::Success);
        assert_eq!(cvar.downcast_ref::<i32>().map(ConVar::get), Some(7));
        assert!(cvar.downcast_ref::<bool>().is_none());
    }

    #[test]
    fn test_convar_display() {
        let cvar = ConVar::new("run_app", true, "");
        assert_eq!(cvar.to_string(), "run_app = \"1\" (bool)");
        cvar.set_locked(true);
        assert_eq!(cvar.to_string(), "run_app = \"1\" (bool) (locked)");
    }
}
