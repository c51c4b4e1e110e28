//! The scoped, hierarchical configuration engine (C1, §4.1).

pub mod engine;
pub mod keyword;
pub mod parser;
pub mod selector;
pub mod value;

pub use engine::{Builtins, Change, ConfigEngine};
pub use keyword::{builtin_keywords, KeywordRegistry, KeywordSpec};
pub use parser::RawConfig;
pub use selector::{NodeFacts, NodeSelector};
pub use value::{convert, ConfigValue, Converter};
