//! 处理器注册表（HandlerRegistry）
//!
//! 事件类型 → 有序的处理器注册列表。注册只追加不覆盖（同一类型多个处理器即广播）；
//! 每次分发都会重新解析，运行期间追加的注册对后续出队的事件立即生效。
//!
use super::EventHandler;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

/// 处理器实例的生命周期
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandlerLifetime {
    /// 每次解析都通过工厂构造新实例
    PerCall,
    /// 首次解析时构造，之后复用同一实例
    #[default]
    Singleton,
}

/// 处理器工厂：在解析时构造处理器实例
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn EventHandler> + Send + Sync>;

pub(crate) struct Registration {
    lifetime: HandlerLifetime,
    factory: HandlerFactory,
    shared: OnceLock<Arc<dyn EventHandler>>,
}

impl Registration {
    /// 构造（或复用）处理器实例；工厂 panic 时单例保持未初始化，下次解析重试
    pub(crate) fn instance(&self) -> Arc<dyn EventHandler> {
        match self.lifetime {
            HandlerLifetime::PerCall => (self.factory)(),
            HandlerLifetime::Singleton => self.shared.get_or_init(|| (self.factory)()).clone(),
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    by_type: DashMap<String, Vec<Arc<Registration>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以共享实例批量构建，等价于逐个调用 `register_shared`
    pub fn from_shared<T, I>(handlers: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = (T, Arc<dyn EventHandler>)>,
    {
        let registry = Self::new();
        for (event_type, handler) in handlers {
            registry.register_shared(event_type, handler);
        }
        registry
    }

    /// 注册处理器构造函数
    pub fn register<F, H>(
        &self,
        event_type: impl Into<String>,
        lifetime: HandlerLifetime,
        factory: F,
    ) where
        F: Fn() -> H + Send + Sync + 'static,
        H: EventHandler + 'static,
    {
        let factory: HandlerFactory =
            Arc::new(move || Arc::new(factory()) as Arc<dyn EventHandler>);
        self.register_factory(event_type, lifetime, factory);
    }

    pub fn register_factory(
        &self,
        event_type: impl Into<String>,
        lifetime: HandlerLifetime,
        factory: HandlerFactory,
    ) {
        self.push(
            event_type.into(),
            Registration {
                lifetime,
                factory,
                shared: OnceLock::new(),
            },
        );
    }

    /// 注册一个已构造好的共享实例
    pub fn register_shared(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let shared = OnceLock::from(handler.clone());
        self.push(
            event_type.into(),
            Registration {
                lifetime: HandlerLifetime::Singleton,
                factory: Arc::new(move || handler.clone()),
                shared,
            },
        );
    }

    fn push(&self, event_type: String, registration: Registration) {
        tracing::debug!(
            event_type = %event_type,
            lifetime = ?registration.lifetime,
            "event handler registered"
        );
        self.by_type
            .entry(event_type)
            .or_default()
            .push(Arc::new(registration));
    }

    /// 按注册顺序解析该类型的处理器；无注册时返回空列表
    pub fn resolve(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.registrations(event_type)
            .iter()
            .map(|r| r.instance())
            .collect()
    }

    /// 注册列表的快照，实例留给调用方在隔离边界内构造
    pub(crate) fn registrations(&self, event_type: &str) -> Vec<Arc<Registration>> {
        // 复制后即释放分片锁，工厂不在锁内执行
        self.by_type
            .get(event_type)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.by_type.get(event_type).map_or(0, |l| l.len())
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
