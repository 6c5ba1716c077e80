// src/formula/mod.rs

//! Formula system for declarative package installs
//!
//! A formula is a TOML file describing one package: where its source
//! lives, the build tools it needs, the auxiliary resources it bundles,
//! and the ordered commands that install it.
//!
//! # Example Formula
//!
//! ```toml
//! name = "scnmaster"
//! version = "0.0.5"
//! homepage = "http://shortcutoslo.no"
//! url = "https://example.com/dist/scnmaster_0.0.5.tar.gz"
//! checksum = { algorithm = "sha1", digest = "1cba61d5b29e1761b0ffdb73377339670abd7188" }
//! depends_on = ["ffmpeg"]
//!
//! [[resource]]
//! name = "pexpect"
//! url = "https://example.com/pexpect-3.3.tar.gz"
//! checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"
//! setup = [
//!   { executable = "python", args = ["setup.py", "install", "--prefix=%(vendor)s"] },
//! ]
//!
//! [[install]]
//! executable = "make"
//! args = ["prefix=%(prefix)s", "install"]
//! ```

pub mod format;
mod parser;
pub mod placeholder;

pub use format::{Checksum, Formula, InstallStep, Resource, SourceSpec};
pub use parser::{parse_formula, parse_formula_file, to_toml, validate_formula};
pub use placeholder::{Placeholder, Substitutions};
