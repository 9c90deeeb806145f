//! Compiles the code snippets in `README.md` as doctests.

#![doc = include_str!("../README.md")]
