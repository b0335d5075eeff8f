//! 并发分块流水线
//!
//! 遍历目录、并行解析文件、按文件顺序流式产出语义块。
//! 内存上限通过预算阻塞实现背压：触顶时生产者等待消费者释放，
//! 不报错也不丢数据。解析失败的文件退化为整文件不透明块并记录失败。

use crate::aggregator::ElementAggregator;
use crate::chunker::{Chunk, ChunkBuilder};
use crate::error::{Result, SemChunkError};
use crate::parser::{AdapterFactory, SupportedLanguage};
use crate::walker::{SourceFile, SourceWalker};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 单文件解析的内存放大系数估计：语法树和元素元数据按源码字节数的倍数计
const MEMORY_EXPANSION_FACTOR: usize = 8;

/// 重排序后输出通道的容量（块数）
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// 流水线配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 单块大小上限（字节）
    pub max_chunk_size: usize,
    /// 流水线总内存预算（字节），触顶时生产者阻塞
    pub memory_ceiling: usize,
    /// 单文件元素树的内存估算上限（字节），超出即放弃解析该文件
    pub per_file_memory_bound: usize,
    /// 工作线程数
    pub worker_threads: usize,
    /// 单文件解析耗时上限
    pub parse_timeout: Duration,
    /// 排除路径的正则模式
    pub exclude_patterns: Vec<String>,
    /// 限定处理的语言，None 表示全部支持的语言
    pub languages: Option<Vec<SupportedLanguage>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 4096,
            memory_ceiling: 256 * 1024 * 1024,
            per_file_memory_bound: 64 * 1024 * 1024,
            worker_threads: num_cpus::get(),
            parse_timeout: Duration::from_secs(10),
            exclude_patterns: Vec::new(),
            languages: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling = bytes;
        self
    }

    pub fn with_per_file_memory_bound(mut self, bytes: usize) -> Self {
        self.per_file_memory_bound = bytes;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = timeout;
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn with_languages(mut self, languages: Vec<SupportedLanguage>) -> Self {
        self.languages = Some(languages);
        self
    }

    /// 校验配置参数
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(SemChunkError::ConfigError(
                "max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(SemChunkError::ConfigError(
                "worker_threads must be greater than zero".to_string(),
            ));
        }
        if self.memory_ceiling < self.max_chunk_size {
            return Err(SemChunkError::ConfigError(
                "memory_ceiling must be at least max_chunk_size".to_string(),
            ));
        }
        if self.per_file_memory_bound == 0 {
            return Err(SemChunkError::ConfigError(
                "per_file_memory_bound must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 内存预算：互斥量加条件变量实现的计数信号量
///
/// 预留超出上限时阻塞等待，而不是返回错误。当前用量为零时放行
/// 任意大小的预留，避免单个超大文件永久卡死。
struct MemoryBudget {
    ceiling: usize,
    used: Mutex<usize>,
    available: Condvar,
}

impl MemoryBudget {
    fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            used: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    /// 阻塞直到预算足够；取消标志置位后直接放行，让工作线程尽快退出
    fn reserve(&self, amount: usize, cancel: &AtomicBool) {
        let mut used = self.used.lock().unwrap();
        while *used > 0 && *used + amount > self.ceiling {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let (guard, _) = self
                .available
                .wait_timeout(used, Duration::from_millis(50))
                .unwrap();
            used = guard;
        }
        *used += amount;
    }

    fn release(&self, amount: usize) {
        let mut used = self.used.lock().unwrap();
        *used = used.saturating_sub(amount);
        self.available.notify_all();
    }
}

/// 单文件处理失败记录
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 流水线运行统计
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub files_total: usize,
    pub files_failed: usize,
    pub chunks_emitted: usize,
    pub bytes_emitted: usize,
    pub duration: Duration,
    pub failures: Vec<FileFailure>,
}

/// 块的流式输出端
///
/// 迭代产出的块严格按文件发现顺序排列，同一文件内按字节位置排列。
/// 迭代结束后通过 [`ChunkStream::into_report`] 取运行统计。
pub struct ChunkStream {
    receiver: Receiver<Chunk>,
    budget: Arc<MemoryBudget>,
    cancel: Arc<AtomicBool>,
    failures: Arc<Mutex<Vec<FileFailure>>>,
    workers: Vec<thread::JoinHandle<()>>,
    files_total: usize,
    chunks_emitted: usize,
    bytes_emitted: usize,
    started: Instant,
}

impl Iterator for ChunkStream {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.receiver.recv().ok()?;
        self.budget.release(chunk.size_bytes);
        self.chunks_emitted += 1;
        self.bytes_emitted += chunk.size_bytes;
        Some(chunk)
    }
}

impl ChunkStream {
    /// 请求提前终止，已排队的块仍会被丢弃
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// 消费完毕后取运行统计
    pub fn into_report(mut self) -> PipelineReport {
        // 排空剩余块，保证工作线程不因通道满而悬挂
        for chunk in self.receiver.iter() {
            self.budget.release(chunk.size_bytes);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let failures = self.failures.lock().unwrap().clone();
        PipelineReport {
            files_total: self.files_total,
            files_failed: failures.len(),
            chunks_emitted: self.chunks_emitted,
            bytes_emitted: self.bytes_emitted,
            duration: self.started.elapsed(),
            failures,
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // 排空通道，让阻塞在发送上的线程得以退出
        while self.receiver.recv().is_ok() {}
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// 并发分块流水线
pub struct ChunkPipeline {
    config: PipelineConfig,
}

impl ChunkPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 处理整个目录树，返回块的流式输出端
    pub fn process_directory(&self, root: impl AsRef<Path>) -> Result<ChunkStream> {
        let mut walker = SourceWalker::new(root.as_ref())
            .with_exclude_patterns(&self.config.exclude_patterns)?;
        if let Some(languages) = &self.config.languages {
            walker = walker.with_languages(languages.clone());
        }
        let files = walker.walk()?;
        info!("Chunking {} files under {}", files.len(), root.as_ref().display());
        Ok(self.process_files(files))
    }

    /// 处理给定的文件列表
    pub fn process_files(&self, files: Vec<SourceFile>) -> ChunkStream {
        let started = Instant::now();
        let files_total = files.len();
        let files = Arc::new(files);
        let budget = Arc::new(MemoryBudget::new(self.config.memory_ceiling));
        let cancel = Arc::new(AtomicBool::new(false));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let next_index = Arc::new(AtomicUsize::new(0));

        // 工作线程 -> 重排线程：带文件序号的块批次
        let (batch_sender, batch_receiver) =
            sync_channel::<(usize, Vec<Chunk>)>(self.config.worker_threads * 2);
        // 重排线程 -> 消费者：按序的单个块
        let (chunk_sender, chunk_receiver) = sync_channel::<Chunk>(OUTPUT_CHANNEL_CAPACITY);

        let worker_count = self.config.worker_threads.min(files_total.max(1));
        let mut workers = Vec::with_capacity(worker_count + 1);
        for _ in 0..worker_count {
            let files = Arc::clone(&files);
            let budget = Arc::clone(&budget);
            let cancel = Arc::clone(&cancel);
            let failures = Arc::clone(&failures);
            let next_index = Arc::clone(&next_index);
            let sender = batch_sender.clone();
            let config = self.config.clone();

            workers.push(thread::spawn(move || {
                worker_loop(&files, &config, &budget, &cancel, &failures, &next_index, &sender);
            }));
        }
        drop(batch_sender);

        // 重排线程：缓存乱序到达的批次，按文件序号顺序放行
        workers.push(thread::spawn(move || {
            let mut pending: BTreeMap<usize, Vec<Chunk>> = BTreeMap::new();
            let mut next_to_emit = 0usize;
            for (index, chunks) in batch_receiver.iter() {
                pending.insert(index, chunks);
                while let Some(chunks) = pending.remove(&next_to_emit) {
                    for chunk in chunks {
                        if chunk_sender.send(chunk).is_err() {
                            return;
                        }
                    }
                    next_to_emit += 1;
                }
            }
        }));

        ChunkStream {
            receiver: chunk_receiver,
            budget,
            cancel,
            failures,
            workers,
            files_total,
            chunks_emitted: 0,
            bytes_emitted: 0,
            started,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    files: &[SourceFile],
    config: &PipelineConfig,
    budget: &MemoryBudget,
    cancel: &AtomicBool,
    failures: &Mutex<Vec<FileFailure>>,
    next_index: &AtomicUsize,
    sender: &SyncSender<(usize, Vec<Chunk>)>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let index = next_index.fetch_add(1, Ordering::Relaxed);
        let Some(file) = files.get(index) else {
            return;
        };

        // 预留解析的估计内存，产出的块字节数由消费端释放
        let estimate = (file.byte_len as usize).saturating_mul(MEMORY_EXPANSION_FACTOR);
        budget.reserve(estimate, cancel);
        let chunks = process_file(file, config, failures);
        let emitted: usize = chunks.iter().map(|chunk| chunk.size_bytes).sum();
        budget.release(estimate.saturating_sub(emitted));

        if sender.send((index, chunks)).is_err() {
            // 消费端已放弃，补还未被消费的预算后退出
            budget.release(emitted);
            return;
        }
    }
}

/// 处理单个文件，失败时退化为不透明块并记录原因
fn process_file(
    file: &SourceFile,
    config: &PipelineConfig,
    failures: &Mutex<Vec<FileFailure>>,
) -> Vec<Chunk> {
    let record_failure = |reason: String| {
        warn!("{}: {}", file.path.display(), reason);
        failures.lock().unwrap().push(FileFailure {
            path: file.path.clone(),
            reason,
        });
    };

    let raw = match std::fs::read(&file.path) {
        Ok(raw) => raw,
        Err(e) => {
            record_failure(format!("read failed: {e}"));
            return Vec::new();
        }
    };
    let source = match String::from_utf8(raw) {
        Ok(source) => source,
        Err(e) => {
            record_failure(format!("not valid UTF-8: {e}"));
            let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
            return vec![ChunkBuilder::opaque_chunk(
                file.path.clone(),
                Some(file.language),
                &lossy,
            )];
        }
    };

    // 预估的元素树超出单文件内存界限时不解析，直接退化为不透明块
    let estimate = source.len().saturating_mul(MEMORY_EXPANSION_FACTOR);
    if estimate > config.per_file_memory_bound {
        record_failure(format!(
            "estimated element tree of {estimate} bytes exceeds the per-file memory bound"
        ));
        return vec![ChunkBuilder::opaque_chunk(
            file.path.clone(),
            Some(file.language),
            &source,
        )];
    }

    let mut adapter = match AdapterFactory::create_adapter(file.language) {
        Ok(adapter) => adapter,
        Err(e) => {
            record_failure(format!("adapter unavailable: {e}"));
            return vec![ChunkBuilder::opaque_chunk(
                file.path.clone(),
                Some(file.language),
                &source,
            )];
        }
    };
    adapter.set_parse_timeout(config.parse_timeout);

    let parse_start = Instant::now();
    let elements = match adapter.extract(&source) {
        Ok(elements) => elements,
        Err(e) => {
            record_failure(format!("parse failed: {e}"));
            return vec![ChunkBuilder::opaque_chunk(
                file.path.clone(),
                Some(file.language),
                &source,
            )];
        }
    };
    let elapsed = parse_start.elapsed();
    debug!(
        "Parsed {} ({} elements in {:?})",
        file.path.display(),
        elements.len(),
        elapsed
    );

    let aggregated =
        ElementAggregator::new().aggregate(file.path.clone(), file.language, elements);
    match ChunkBuilder::new(config.max_chunk_size).build_chunks(
        &aggregated,
        &source,
        adapter.as_mut(),
    ) {
        Ok(chunks) => chunks,
        Err(e) => {
            record_failure(format!("chunking failed: {e}"));
            vec![ChunkBuilder::opaque_chunk(
                file.path.clone(),
                Some(file.language),
                &source,
            )]
        }
    }
}
