//! Core types shared by every subsystem.

use crate::error::StreamError;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds on the orchestrator clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Wall-clock time since the Unix epoch.
    pub fn wall_clock() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Milliseconds elapsed from `earlier` to `self` (zero if `earlier` is later).
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// `millis` later, saturating.
    pub fn plus(self, millis: u64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a managed subscription: `<store>_<millis>_<suffix>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    /// Generate a new id for a store at the given instant.
    pub fn generate(store_name: &str, at: Timestamp) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        SubscriptionId(format!("{}_{}_{}", store_name, at.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle mode of a derived stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Always live, uncached, reference counted.
    Component,
    /// Cached by name, kept alive independent of consumers.
    Data,
}

/// Identifiers treated as cross-cutting surfaces that outlive navigation.
pub const DEFAULT_GLOBAL_IDENTIFIERS: &[&str] = &["router", "auth", "notification", "header"];

/// What kind of UI surface backs a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Modal,
    Form,
    Screen,
    Global,
    Component,
}

impl SurfaceKind {
    /// Classify a stream from its name when the caller did not declare a surface.
    pub fn infer(stream_name: &str) -> Self {
        let name = stream_name.to_lowercase();
        if name.contains("modal") || name.contains("dialog") {
            SurfaceKind::Modal
        } else if name.contains("form") || name.contains("edit") || name.contains("input") {
            SurfaceKind::Form
        } else if DEFAULT_GLOBAL_IDENTIFIERS.iter().any(|id| name.contains(id)) {
            SurfaceKind::Global
        } else if name.contains("page") || name.contains("screen") {
            SurfaceKind::Screen
        } else {
            SurfaceKind::Component
        }
    }

    /// Keystroke-driven surfaces never get debounced.
    pub fn is_input_surface(self) -> bool {
        matches!(self, SurfaceKind::Modal | SurfaceKind::Form)
    }
}

/// A value carried in one combiner slot.
///
/// Absent slots are replaced by [`SlotValue::placeholder`] before the
/// combiner runs, so it never sees a hole.
pub trait SlotValue: Clone + PartialEq + Send + Sync + 'static {
    fn is_absent(&self) -> bool;

    fn placeholder() -> Self;

    /// Return `self`, or the placeholder when absent.
    fn or_placeholder(&self) -> Self {
        if self.is_absent() {
            Self::placeholder()
        } else {
            self.clone()
        }
    }
}

impl SlotValue for serde_json::Value {
    fn is_absent(&self) -> bool {
        self.is_null()
    }

    fn placeholder() -> Self {
        serde_json::Value::Object(serde_json::Map::new())
    }
}

impl<T> SlotValue for Option<T>
where
    T: Default + Clone + PartialEq + Send + Sync + 'static,
{
    fn is_absent(&self) -> bool {
        self.is_none()
    }

    fn placeholder() -> Self {
        Some(T::default())
    }
}

/// Everything a fallback builder knows about a contained failure.
#[derive(Clone, Copy, Debug)]
pub struct FallbackContext<'a> {
    pub stream: &'a str,
    pub mode: StreamMode,
    pub error: &'a StreamError,
}

/// Output type of a derived stream.
///
/// Equality drives deduplication; `fallback` is emitted in place of a
/// failed recombination.
pub trait ViewModel: Clone + PartialEq + Send + Sync + 'static {
    fn fallback(ctx: &FallbackContext<'_>) -> Self;
}

impl ViewModel for serde_json::Value {
    fn fallback(ctx: &FallbackContext<'_>) -> Self {
        match ctx.mode {
            StreamMode::Data => serde_json::json!({}),
            StreamMode::Component if ctx.stream.to_lowercase().contains("menu") => {
                serde_json::json!({ "menuItems": [], "loading": false, "error": null })
            }
            StreamMode::Component => serde_json::json!({
                "loading": false,
                "error": ctx.error.to_string(),
                "data": null,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_id_format() {
        let id = SubscriptionId::generate("IndicatorsStore", Timestamp(1234));
        let parts: Vec<&str> = id.as_str().splitn(3, '_').collect();
        assert_eq!(parts[0], "IndicatorsStore");
        assert_eq!(parts[1], "1234");
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| !c.is_ascii_uppercase()));

        let other = SubscriptionId::generate("IndicatorsStore", Timestamp(1234));
        assert_ne!(id, other);
    }

    #[test]
    fn test_surface_inference() {
        assert_eq!(SurfaceKind::infer("NpsModal"), SurfaceKind::Modal);
        assert_eq!(SurfaceKind::infer("filterForm"), SurfaceKind::Form);
        assert_eq!(SurfaceKind::infer("AuthSession"), SurfaceKind::Global);
        assert_eq!(SurfaceKind::infer("analyticsPage"), SurfaceKind::Screen);
        assert_eq!(SurfaceKind::infer("kpiSection"), SurfaceKind::Component);
        assert!(SurfaceKind::Modal.is_input_surface());
        assert!(!SurfaceKind::Screen.is_input_surface());
    }

    #[test]
    fn test_slot_placeholders() {
        assert_eq!(serde_json::Value::Null.or_placeholder(), json!({}));
        assert_eq!(json!(0).or_placeholder(), json!(0));
        assert_eq!(None::<Vec<u8>>.or_placeholder(), Some(vec![]));
    }

    #[test]
    fn test_json_fallbacks() {
        let err = StreamError::combiner("bad row");
        let ui = serde_json::Value::fallback(&FallbackContext {
            stream: "kpis",
            mode: StreamMode::Component,
            error: &err,
        });
        assert_eq!(ui["loading"], json!(false));
        assert_eq!(ui["error"], json!("Combiner failed: bad row"));
        assert!(ui["data"].is_null());

        let menu = serde_json::Value::fallback(&FallbackContext {
            stream: "SideMenu",
            mode: StreamMode::Component,
            error: &err,
        });
        assert_eq!(menu["menuItems"], json!([]));

        let data = serde_json::Value::fallback(&FallbackContext {
            stream: "kpis",
            mode: StreamMode::Data,
            error: &err,
        });
        assert_eq!(data, json!({}));
    }

    #[test]
    fn test_timestamp_since_saturates() {
        assert_eq!(Timestamp(10).since(Timestamp(4)), 6);
        assert_eq!(Timestamp(4).since(Timestamp(10)), 0);
    }
}
