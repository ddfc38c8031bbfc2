//! 配置管理
//!
//! 多个配置源按优先级叠加，TOML 表会被展平为点分隔的键，例如 `aop.expose-proxy`

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{ContainerError, ContainerResult};

/// 配置值类型
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
}

impl ConfigValue {
    /// 转换为字符串
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 转换为整数
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 转换为布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 转换为字符串列表
    ///
    /// 支持 TOML 数组，也支持逗号分隔的字符串
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            ConfigValue::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// 配置源 trait
pub trait PropertySource: Send + Sync {
    /// 配置源名称
    fn name(&self) -> &str;

    /// 获取配置值
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// 配置源优先级（数字越大优先级越高）
    fn priority(&self) -> i32 {
        0
    }
}

/// Environment - 配置管理器
pub struct Environment {
    /// 配置源列表（按优先级降序）
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("sources", &self.sources.read().iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    /// 创建带有环境变量配置源的 Environment，变量名为 `prefix` 加大写的键
    pub fn with_env_prefix(prefix: impl Into<String>) -> Self {
        let env = Self::new();
        env.add_property_source(Box::new(EnvironmentPropertySource::new(prefix)));
        env
    }

    /// 添加配置源
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        let mut sources = self.sources.write();
        sources.push(source);
        sources.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// 获取配置值，高优先级配置源优先
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        for source in sources.iter() {
            if let Some(value) = source.get(key) {
                tracing::trace!("Config '{}' resolved from source '{}'", key, source.name());
                return Some(value);
            }
        }
        None
    }

    /// 获取字符串配置
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(String::from))
    }

    /// 获取布尔值配置（带默认值）
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// 获取字符串列表配置
    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).and_then(|v| v.as_string_list())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// 环境变量配置源
///
/// `WEAVER_AOP_EXPOSE_PROXY` 对应键 `aop.expose.proxy` 以及 `aop.expose-proxy`
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    /// 将配置键转换为环境变量名
    fn key_to_env(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.prefix,
            key.replace(['.', '-'], "_").to_uppercase()
        )
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.key_to_env(key)).ok().map(ConfigValue::String)
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML 配置源
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    /// 从文件加载
    pub fn from_file(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ContainerError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, path.display().to_string())
    }

    /// 从字符串解析
    pub fn parse(content: &str, name: impl Into<String>) -> ContainerResult<Self> {
        let value: toml::Value = toml::from_str(content)
            .map_err(|e| ContainerError::Configuration(format!("invalid TOML: {}", e)))?;

        let mut properties = HashMap::new();
        flatten(&value, String::new(), &mut properties);
        Ok(Self {
            name: name.into(),
            properties,
            priority: 0,
        })
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn flatten(value: &toml::Value, prefix: String, out: &mut HashMap<String, ConfigValue>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(child, key, out);
            }
        }
        other => {
            out.insert(prefix, to_config_value(other));
        }
    }
}

fn to_config_value(value: &toml::Value) -> ConfigValue {
    match value {
        toml::Value::String(s) => ConfigValue::String(s.clone()),
        toml::Value::Integer(i) => ConfigValue::Int(*i),
        toml::Value::Float(f) => ConfigValue::Float(*f),
        toml::Value::Boolean(b) => ConfigValue::Bool(*b),
        toml::Value::Array(items) => ConfigValue::Array(items.iter().map(to_config_value).collect()),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        // 数组中的内联表不展开
        toml::Value::Table(_) => ConfigValue::String(value.to_string()),
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置源（用于测试或运行时配置）
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_is_flattened() {
        let source = TomlPropertySource::parse(
            r#"
            [aop]
            auto = false
            expose-proxy = true
            include-patterns = ["audit.*", "log.*"]
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(source.get("aop.auto"), Some(ConfigValue::Bool(false)));
        assert_eq!(source.get("aop.expose-proxy"), Some(ConfigValue::Bool(true)));
        assert_eq!(
            source.get("aop.include-patterns").unwrap().as_string_list().unwrap(),
            vec!["audit.*".to_string(), "log.*".to_string()]
        );
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = TomlPropertySource::parse("[aop", "broken").err().unwrap();
        assert!(matches!(err, ContainerError::Configuration(_)));
    }

    #[test]
    fn test_priority_order() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("low")
                .with_property("aop.auto", ConfigValue::Bool(true))
                .with_priority(1),
        ));
        env.add_property_source(Box::new(
            MapPropertySource::new("high")
                .with_property("aop.auto", ConfigValue::String("no".into()))
                .with_priority(10),
        ));

        assert!(!env.get_bool_or("aop.auto", true));
        assert!(env.get_bool_or("aop.missing", true));
    }

    #[test]
    fn test_comma_separated_list() {
        let value = ConfigValue::String("a, b,,c".to_string());
        assert_eq!(
            value.as_string_list().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_env_key_mapping() {
        let source = EnvironmentPropertySource::new("WEAVER_");
        assert_eq!(source.key_to_env("aop.expose-proxy"), "WEAVER_AOP_EXPOSE_PROXY");
    }

    #[test]
    fn test_env_source_overrides_map_source() {
        std::env::set_var("WEAVER_CONFIG_TEST_AOP_AUTO", "false");
        let env = Environment::with_env_prefix("WEAVER_CONFIG_TEST_");
        env.add_property_source(Box::new(
            MapPropertySource::new("defaults")
                .with_property("aop.auto", ConfigValue::Bool(true))
                .with_property("aop.include-patterns", ConfigValue::String("audit.*".into())),
        ));

        assert!(!env.get_bool_or("aop.auto", true));
        assert_eq!(
            env.get_string_list("aop.include-patterns").unwrap(),
            vec!["audit.*".to_string()]
        );
        std::env::remove_var("WEAVER_CONFIG_TEST_AOP_AUTO");
    }
}
