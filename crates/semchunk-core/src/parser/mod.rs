//! 多语言解析适配器模块
//!
//! 提供通用的语言适配器接口和具体的语言实现

pub mod common;
pub mod go;
pub mod javascript;
pub mod python;

// 重新导出核心类型
pub use common::{
    AdapterFactory, LanguageAdapter, RawElement, RawElementKind, SupportedLanguage,
};
pub use go::GoAdapter;
pub use javascript::JavaScriptAdapter;
pub use python::PythonAdapter;
