//! AOP 配置

use weaver_core::Environment;

/// AOP 配置属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AopProperties {
    /// 是否启用自动代理
    pub auto: bool,

    /// 调用期间是否通过 `AopContext` 暴露代理
    pub expose_proxy: bool,

    /// 切面组件名过滤规则（正则），为空时所有组件都可以作为切面
    pub include_patterns: Vec<String>,
}

impl Default for AopProperties {
    fn default() -> Self {
        Self {
            auto: true,
            expose_proxy: false,
            include_patterns: Vec::new(),
        }
    }
}

impl AopProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            auto: env.get_bool_or("aop.auto", true),
            expose_proxy: env.get_bool_or("aop.expose-proxy", false),
            include_patterns: env
                .get_string_list("aop.include-patterns")
                .unwrap_or_default(),
        }
    }
}
