//! Weaver AOP 过程宏
//!
//! 提供 `#[aspect]`：在编译期提取切面的结构信息（通知方法、命名切点、
//! declare-parents 声明），生成 `AspectType` 实现并通过 inventory 自动登记

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemImpl};

mod aspect;
mod utils;

/// `#[aspect]` 属性宏
///
/// 标记切面类型的 impl 块。可选参数：
/// - `name = "..."`：切面简短名称
/// - `order = N`：排序值，数值越小越靠外层
/// - `per = "pertarget(...)"`：实例化模型，缺省为单例
///
/// 方法属性：
/// - `#[pointcut("expr")]`：命名切点，其他通知可以写作 `name()` 引用
/// - `#[before("expr")]` / `#[after("expr")]`：`fn(&self, jp: &JoinPoint)`
/// - `#[around("expr")]`：`fn(&self, pjp: ProceedingJoinPoint) -> anyhow::Result<Instance>`
/// - `#[after_returning(pointcut = "expr", returning = "value")]`：`fn(&self, jp, value: &R)`
/// - `#[after_throwing(pointcut = "expr", throwing = "err")]`：`fn(&self, jp, err: &E)`
/// - `#[declare_parents(interface = "I", types_matching = "pattern")]`：
///   标记返回默认实现的无参关联函数
///
/// 通知方法可以返回 `()` 或 `Result<(), E>`。
///
/// 使用示例：
/// ```ignore
/// use weaver_aop::prelude::*;
///
/// #[derive(Default)]
/// pub struct LoggingAspect;
///
/// #[aspect(order = 1)]
/// impl LoggingAspect {
///     #[pointcut("execution(* OrderService.*(..))")]
///     fn service_ops(&self) {}
///
///     #[before("service_ops()")]
///     fn log_entry(&self, jp: &JoinPoint<'_>) {
///         tracing::info!("-> {}", jp.signature());
///     }
///
///     #[after_returning(pointcut = "service_ops()", returning = "total")]
///     fn log_total(&self, jp: &JoinPoint<'_>, total: &u64) {
///         tracing::info!("<- {} = {}", jp.signature(), total);
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn aspect(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = aspect::AspectArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as ItemImpl);
    aspect::impl_aspect(args, input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
