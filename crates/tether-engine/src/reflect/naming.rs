//! Native naming convention for member names and call signatures

use crate::defaults::{GENERIC_LIST_TYPE, GENERIC_TYPE};

/// Append `name` lowered to the native convention.
///
/// The first letter is lowered, and so is a leading run of uppercase letters
/// up to the letter that starts the next syllable: `URLFor` becomes
/// `urlFor`, `ID` becomes `id`, `X_Y` becomes `x_Y`.
pub fn append_lowered_name(buf: &mut String, name: &str) {
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in name.char_indices() {
        if !c.is_uppercase() {
            match prev {
                None => {}
                Some((previ, p)) if previ == 0 || c == '_' => buf.extend(p.to_lowercase()),
                Some((_, p)) => buf.push(p),
            }
            buf.push_str(&name[i..]);
            return;
        }
        if let Some((_, p)) = prev {
            buf.extend(p.to_lowercase());
        }
        prev = Some((i, c));
    }
    if let Some((_, p)) = prev {
        buf.extend(p.to_lowercase());
    }
}

/// `name` lowered to the native convention.
pub fn lowered_name(name: &str) -> String {
    let mut buf = String::with_capacity(name.len());
    append_lowered_name(&mut buf, name);
    buf
}

/// Call signature with every parameter boxed generically, e.g.
/// `greet(QVariant)`.
pub fn method_signature(lowered: &str, num_in: usize) -> String {
    let params = vec![GENERIC_TYPE; num_in].join(",");
    format!("{}({})", lowered, params)
}

/// Result type for a method declaring `num_out` results.
pub fn result_signature(num_out: usize) -> &'static str {
    match num_out {
        0 => "",
        1 => GENERIC_TYPE,
        _ => GENERIC_LIST_TYPE,
    }
}
