//! Concrete `LanguageProvider` implementations registered statically with
//! a `judge::languages::LanguageManager`:
//!
//! * C/C++, in `cxx`;
//! * Pascal, in `pascal`;
//! * Python, in `py`;
//! * Rust, in `rust`.
//!
//! There is no dynamic-library loading here: `register_all` is called
//! directly by a binary's startup code, once, against its own
//! `LanguageManager`.

#[macro_use]
extern crate log;
extern crate judge;

mod cxx;
mod pascal;
mod py;
mod rust;
mod utils;

use judge::languages::LanguageManager;

/// Register every built-in language provider with `manager`. A single
/// provider failing to initialize (e.g. a missing config file whose
/// defaults still let it register, per `utils::Config::from_file`) does not
/// stop the others; a hard failure (genuinely missing toolchain config) is
/// logged and aborts registration of that language only.
pub fn register_all(manager: &LanguageManager) {
    let initializers: [(&'static str, fn(&LanguageManager) -> Result<(), Box<dyn std::error::Error>>); 4] = [
        ("cxx", cxx::init_cxx_providers),
        ("pascal", pascal::init_pascal_providers),
        ("python", py::init_py_providers),
        ("rust", rust::init_rust_providers),
    ];

    for (name, init) in &initializers {
        info!("initializing {} language providers", name);
        if let Err(e) = init(manager) {
            error!("failed to initialize {} language providers: {}", name, e);
        }
    }
}
