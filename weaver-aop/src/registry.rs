//! 通知器注册表
//!
//! 从容器中发现切面组件并缓存解析结果：
//! - 单例作用域的单例切面缓存通知器列表
//! - 其余切面缓存实例工厂，每次访问都重新解析
//!
//! 切面名称列表只计算一次（双重检查锁），两个缓存各自加锁

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use weaver_core::ListableComponentFactory;

use crate::advisor::Advisor;
use crate::advisor_factory::AdvisorFactory;
use crate::error::{AopResult, ConfigError};
use crate::instance_factory::{
    AspectInstanceFactory, ContainerAspectInstanceFactory, PrototypeInstanceFactory,
};
use crate::metadata::{AspectMetadata, PerClauseKind};

/// 通知器注册表
pub struct AdvisorRegistry {
    container: Arc<dyn ListableComponentFactory>,
    advisor_factory: Arc<AdvisorFactory>,
    include_patterns: Vec<Regex>,
    aspect_names: OnceCell<Vec<String>>,
    init_lock: Mutex<()>,
    advisors_cache: RwLock<HashMap<String, Vec<Advisor>>>,
    factory_cache: RwLock<HashMap<String, Arc<dyn AspectInstanceFactory>>>,
}

impl AdvisorRegistry {
    pub fn new(
        container: Arc<dyn ListableComponentFactory>,
        advisor_factory: Arc<AdvisorFactory>,
    ) -> Self {
        Self {
            container,
            advisor_factory,
            include_patterns: Vec::new(),
            aspect_names: OnceCell::new(),
            init_lock: Mutex::new(()),
            advisors_cache: RwLock::new(HashMap::new()),
            factory_cache: RwLock::new(HashMap::new()),
        }
    }

    /// 只把名称匹配任一规则的组件视为切面候选
    pub fn with_include_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> AopResult<Self> {
        self.include_patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|e| ConfigError::InvalidIncludePattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn advisor_factory(&self) -> &Arc<AdvisorFactory> {
        &self.advisor_factory
    }

    /// 组件是否可以作为切面
    pub fn is_eligible(&self, name: &str) -> bool {
        self.include_patterns.is_empty()
            || self.include_patterns.iter().any(|p| p.is_match(name))
    }

    /// 容器中的切面组件名称（按注册顺序）
    pub fn aspect_names(&self) -> AopResult<Vec<String>> {
        self.ensure_discovered()?;
        Ok(self.aspect_names.get().cloned().unwrap_or_default())
    }

    /// 获取单个组件的通知器；非切面或未知组件返回空列表
    pub fn build_advisors(&self, name: &str) -> AopResult<Vec<Advisor>> {
        self.ensure_discovered()?;
        self.cached_advisors(name)
    }

    /// 获取容器中所有切面的通知器
    pub fn build_all_advisors(&self) -> AopResult<Vec<Advisor>> {
        if let Some(names) = self.aspect_names.get() {
            return self.collect(names);
        }

        let _guard = self.init_lock.lock();
        if let Some(names) = self.aspect_names.get() {
            return self.collect(names);
        }
        let (names, advisors) = self.discover()?;
        // 仅在持有 init_lock 时写入
        let _ = self.aspect_names.set(names);
        Ok(advisors)
    }

    /// 组件的通知器列表是否已缓存
    pub fn has_cached_advisors(&self, name: &str) -> bool {
        self.advisors_cache.read().contains_key(name)
    }

    /// 组件的实例工厂是否已缓存
    pub fn has_cached_factory(&self, name: &str) -> bool {
        self.factory_cache.read().contains_key(name)
    }

    fn ensure_discovered(&self) -> AopResult<()> {
        if self.aspect_names.get().is_some() {
            return Ok(());
        }
        self.build_all_advisors().map(|_| ())
    }

    fn collect(&self, names: &[String]) -> AopResult<Vec<Advisor>> {
        let mut advisors = Vec::new();
        for name in names {
            advisors.extend(self.cached_advisors(name)?);
        }
        Ok(advisors)
    }

    fn cached_advisors(&self, name: &str) -> AopResult<Vec<Advisor>> {
        if let Some(advisors) = self.advisors_cache.read().get(name) {
            return Ok(advisors.clone());
        }
        let factory = self.factory_cache.read().get(name).cloned();
        match factory {
            Some(factory) => self.advisor_factory.get_advisors(factory),
            None => Ok(Vec::new()),
        }
    }

    /// 首次发现：遍历容器，构建并缓存每个切面的解析结果
    fn discover(&self) -> AopResult<(Vec<String>, Vec<Advisor>)> {
        let mut names = Vec::new();
        let mut advisors = Vec::new();

        for name in self.container.component_names() {
            if !self.is_eligible(&name) {
                continue;
            }
            let Some(class_name) = self.container.component_type(&name) else {
                continue;
            };
            if !self.advisor_factory.is_aspect(&class_name) {
                continue;
            }
            let Some(class) = self.advisor_factory.catalog().get(&class_name) else {
                continue;
            };

            let metadata = Arc::new(AspectMetadata::new(class, name.clone())?);
            let singleton_scoped = self.container.is_singleton(&name);
            if metadata.per_clause_kind() == PerClauseKind::Singleton {
                let factory: Arc<dyn AspectInstanceFactory> = Arc::new(
                    ContainerAspectInstanceFactory::new(
                        Arc::clone(&self.container),
                        name.clone(),
                        Arc::clone(&metadata),
                    ),
                );
                let resolved = self.advisor_factory.get_advisors(Arc::clone(&factory))?;
                if singleton_scoped {
                    self.advisors_cache
                        .write()
                        .insert(name.clone(), resolved.clone());
                } else {
                    self.factory_cache.write().insert(name.clone(), factory);
                }
                advisors.extend(resolved);
            } else {
                if singleton_scoped {
                    return Err(ConfigError::SingletonContradiction { name }.into());
                }
                let factory: Arc<dyn AspectInstanceFactory> =
                    Arc::new(PrototypeInstanceFactory::new(
                        Arc::clone(&self.container),
                        name.clone(),
                        Arc::clone(&metadata),
                    )?);
                self.factory_cache
                    .write()
                    .insert(name.clone(), Arc::clone(&factory));
                advisors.extend(self.advisor_factory.get_advisors(factory)?);
            }

            tracing::debug!(
                "Discovered aspect '{}' ({}, {})",
                name,
                metadata.per_clause_kind(),
                if singleton_scoped { "singleton" } else { "prototype" }
            );
            names.push(name);
        }

        tracing::info!("Resolved {} aspects with {} advisors", names.len(), advisors.len());
        Ok((names, advisors))
    }
}
