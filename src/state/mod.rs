pub mod addr;
pub mod document;
pub mod patch;
pub mod sanitize;

pub use addr::{module_path_to_string, provider_address_for_type, resource_key};
pub use document::{ensure_initialized, StateDocument};
pub use patch::{patch_evaluated_fast, patch_literals, patch_targeted_exact_by_files};
pub use sanitize::{deep_equal_jsonish, sanitize_value};
