//! Weft Parse - source-text front end for the weft prompt compiler.
//!
//! Turns template source into the fixed node vocabulary of `weft_ir`:
//! - template markup (text, tags, `{{#if}}`/`{{#for}}` blocks, config
//!   fences) is scanned by a byte cursor;
//! - embedded expressions are lexed lazily with `logos` and parsed with a
//!   binding-power loop, stopping at the first token that cannot continue
//!   the expression so the template side can resume at `}}`.
//!
//! All spans are absolute byte offsets into the original source.

mod cursor;
mod expr;
mod template;

pub use cursor::Cursor;
pub use template::parse;
