use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{info, warn};

use super::catalog::{QueueCatalog, QueueDefinition};
use super::context::BrokerContext;
use super::handler::{self, DeliveryHandler};
use super::message::Message;
use super::options::QueueOptions;
use super::queue::{PushResult, Queue};
use crate::utils::{BrokerError, Result};

/// Registry of named queues.
///
/// The broker owns the queues and the catalog that lists them. It does not
/// deliver anything itself: each queue runs its own dispatch and timers once
/// created. Creating queues spawns tasks, so it must happen inside a tokio
/// runtime.
#[derive(Debug)]
pub struct Broker {
    context: Arc<BrokerContext>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    catalog: Mutex<QueueCatalog>,
}

impl Broker {
    /// Creates an empty broker. The catalog file, if configured, is
    /// overwritten by the first queue change; use `open` to load it instead.
    pub fn new(context: BrokerContext) -> Self {
        Self {
            context: Arc::new(context),
            queues: RwLock::new(HashMap::new()),
            catalog: Mutex::new(QueueCatalog::default()),
        }
    }

    /// Loads the catalog and recreates every queue it lists, restoring
    /// persisted messages.
    pub fn open(context: BrokerContext) -> Result<Self> {
        let broker = Self::new(context);
        let catalog = match broker.context.catalog_file() {
            Some(path) => QueueCatalog::load(path)?,
            None => QueueCatalog::default(),
        };

        for definition in &catalog.queues {
            let handler = handler::for_options(&definition.options);
            broker.start_queue(definition.clone(), handler)?;
        }
        info!(queues = catalog.queues.len(), "Broker opened");
        *broker.lock_catalog() = catalog;
        Ok(broker)
    }

    pub fn context(&self) -> &BrokerContext {
        &self.context
    }

    fn lock_catalog(&self) -> MutexGuard<'_, QueueCatalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a queue with the handler its options name.
    pub fn create_queue(&self, name: &str, options: QueueOptions) -> Result<Arc<Queue>> {
        let handler = handler::for_options(&options);
        self.create_queue_with_handler(name, options, handler)
    }

    /// Creates a queue with a custom handler. The catalog only records the
    /// options, so after a restart the queue comes back with the handler its
    /// options name.
    pub fn create_queue_with_handler(
        &self,
        name: &str,
        options: QueueOptions,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Arc<Queue>> {
        let definition = QueueDefinition {
            name: name.to_string(),
            path: Some(self.context.queue_path(name)),
            options,
        };
        let queue = self.start_queue(definition.clone(), handler)?;
        self.update_catalog(|catalog| catalog.upsert(definition))?;
        Ok(queue)
    }

    fn start_queue(
        &self,
        definition: QueueDefinition,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Arc<Queue>> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&definition.name) {
            return Err(BrokerError::QueueExists(definition.name));
        }

        let path = definition
            .path
            .unwrap_or_else(|| self.context.queue_path(&definition.name));
        let queue = Arc::new(Queue::open(
            definition.name.clone(),
            path,
            definition.options,
            handler,
            self.context.clone(),
        )?);
        queue.start();
        queues.insert(definition.name.clone(), queue.clone());

        info!(queue = %definition.name, "Queue created");
        Ok(queue)
    }

    fn update_catalog(&self, change: impl FnOnce(&mut QueueCatalog)) -> Result<()> {
        let mut catalog = self.lock_catalog();
        change(&mut catalog);
        match self.context.catalog_file() {
            Some(path) => catalog.save(path),
            None => Ok(()),
        }
    }

    pub fn queue(&self, name: &str) -> Result<Arc<Queue>> {
        self.queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))
    }

    /// Queue names in alphabetical order.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Pushes `message` into the named queue.
    pub fn push(&self, queue: &str, message: Message) -> Result<PushResult> {
        Ok(self.queue(queue)?.push(message))
    }

    /// Destroys a queue: its files are removed and it leaves the catalog.
    pub async fn remove_queue(&self, name: &str) -> Result<()> {
        let queue = self
            .queues
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;

        let destroyed = queue.destroy().await;
        self.update_catalog(|catalog| {
            catalog.remove(name);
        })?;
        destroyed
    }

    /// Shuts down every queue, keeping their files. Returns the first error
    /// after attempting all of them.
    pub async fn shutdown(&self) -> Result<()> {
        let queues: Vec<Arc<Queue>> = self
            .queues
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, queue)| queue)
            .collect();

        let results = futures::future::join_all(queues.iter().map(|q| q.shutdown())).await;
        let mut first_error = None;
        for (queue, result) in queues.iter().zip(results) {
            if let Err(e) = result {
                warn!(queue = %queue.name(), error = %e, "Queue did not shut down cleanly");
                first_error.get_or_insert(e);
            }
        }

        info!(queues = queues.len(), "Broker stopped");
        first_error.map_or(Ok(()), Err)
    }
}
