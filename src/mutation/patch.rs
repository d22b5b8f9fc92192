//! JSON Patch construction and JSON Pointer escaping

use json_patch::{AddOperation, PatchOperation};
use jsonptr::{PointerBuf, Token};
use serde_json::Value;

/// `add` operation at the pointer made of `tokens`
pub fn add<'a>(tokens: impl IntoIterator<Item = &'a str>, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens),
        value,
    })
}

/// Escape one reference token per RFC 6901: `~` becomes `~0`, `/` becomes `~1`
#[must_use]
pub fn escape_json_pointer(token: &str) -> String {
    Token::new(token).encoded().to_owned()
}
