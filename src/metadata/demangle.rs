//! Demangling of value-runtime class names reported by the dynamic runtime.
//!
//! Value-runtime classes exposed to the dynamic runtime carry mangled names
//! of the form `_TtC<len><module><len><class>`. Only that simple shape is
//! handled; anything else is returned unchanged.

use std::sync::OnceLock;

use regex_lite::Regex;

const MANGLED_CLASS_PREFIX: &str = "_TtC";

fn length_prefix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([1-9][0-9]*)").ok()).as_ref()
}

/// Split a `<len><text>` component off the front of `input`.
fn take_component(input: &str) -> Option<(&str, &str)> {
    let digits = length_prefix()?.captures(input)?.get(1)?.as_str();
    let len: usize = digits.parse().ok()?;
    let rest = &input[digits.len()..];
    let component = rest.get(..len)?;
    Some((component, &rest[len..]))
}

/// `_TtC5Hello5World` becomes `Hello.World`.
pub fn demangle_class_name(name: &str) -> String {
    let Some(rest) = name.strip_prefix(MANGLED_CLASS_PREFIX) else {
        return name.to_string();
    };
    let Some((module, rest)) = take_component(rest) else {
        return name.to_string();
    };
    let Some((class, _)) = take_component(rest) else {
        return name.to_string();
    };
    format!("{}.{}", module, class)
}
