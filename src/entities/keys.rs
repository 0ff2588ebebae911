//! Well-known clip names and property keys.
//!
//! Avoid string typos, enable IDE autocomplete.
//! Usage: `desc.props.get_i32(P_DEFAULT)`

// === Clip names ===
/// Output clip present on every image effect
pub const OUTPUT_CLIP: &str = "Output";
/// Conventional name of the main input of filters
pub const SIMPLE_SOURCE_CLIP: &str = "Source";

// === Param descriptor properties ===
/// Declared default value
pub const P_DEFAULT: &str = "default";
/// Human-readable label
pub const P_LABEL: &str = "label";
/// Choice options (StrList)
pub const P_CHOICE_OPTIONS: &str = "choice_options";
/// Hint that the param affects rendering
pub const P_EVALUATE_ON_CHANGE: &str = "evaluate_on_change";

// === Per-pixel cost ===
/// Bytes per pixel assumed by memory estimates (4 float channels)
pub const ESTIMATE_BYTES_PER_PIXEL: usize = 4 * std::mem::size_of::<f32>();
