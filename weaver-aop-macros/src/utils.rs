//! 工具函数

use syn::{Ident, Pat, PatType, ReturnType, Type};

/// 返回类型是否为 `Result<..>`（包括 `anyhow::Result<..>`）
pub fn returns_result(output: &ReturnType) -> bool {
    match output {
        ReturnType::Default => false,
        ReturnType::Type(_, ty) => match ty.as_ref() {
            Type::Path(path) => path
                .path
                .segments
                .last()
                .map(|segment| segment.ident == "Result")
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// `&T` 中的 `T`
pub fn referent(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Reference(reference) => Some(reference.elem.as_ref()),
        _ => None,
    }
}

/// 类型是否写作 `anyhow::Error`
pub fn is_anyhow_error(ty: &Type) -> bool {
    let Type::Path(path) = ty else {
        return false;
    };
    let segments: Vec<String> = path
        .path
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    segments == ["anyhow", "Error"]
}

/// 参数名
pub fn param_ident(param: &PatType) -> Option<&Ident> {
    match param.pat.as_ref() {
        Pat::Ident(pat) => Some(&pat.ident),
        _ => None,
    }
}
