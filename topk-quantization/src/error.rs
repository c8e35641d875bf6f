/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Formatting utilities for error chains.

/// Format the entire error chain for `err` by first calling `err.to_string()` and then
/// by walking the error's
/// [source tree](https://doc.rust-lang.org/std/error/trait.Error.html#method.source).
///
/// ```
/// use topk_quantization::{error::format, topk::Builder};
///
/// let err = Builder::new(0).build().unwrap_err();
/// assert!(format(&err).starts_with("parameter \"topk\" invalid"));
/// ```
pub fn format<E>(err: &E) -> String
where
    E: std::error::Error + ?Sized,
{
    struct SourceIterator<'a>(Option<&'a (dyn std::error::Error + 'static)>);
    impl<'a> Iterator for SourceIterator<'a> {
        type Item = &'a (dyn std::error::Error + 'static);
        fn next(&mut self) -> Option<Self::Item> {
            let current = self.0;
            self.0 = match current {
                Some(current) => current.source(),
                None => None,
            };
            current
        }
    }

    let mut message = err.to_string();
    for source in SourceIterator(err.source()) {
        message.push_str("\n    caused by: ");
        message.push_str(&source.to_string());
    }
    message
}

///////////
// Tests //
///////////
