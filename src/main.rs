/*!
# Chunked Parallel Executor

Утилита командной строки для пула потоков и параллельных операций над
чанками.

## Режимы

- **demo** - все операции на небольшом примере
- **benchmark** - сравнение режима пула и временных потоков
- **health** - проверка работоспособности пула, отчёт в JSON
- **print-config** - итоговая конфигурация в формате TOML

*/

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use chunked_exec::config::{Config, LoggingConfig};
use chunked_exec::{CancellationToken, ChunkedExecutor, MetricsCollector, Monoid, WorkerPool};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(name = "chunked-exec")]
#[command(about = "Fixed worker pool and chunked parallel operations")]
#[command(version)]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long)]
    config: Option<String>,

    /// Количество потоков пула и чанков
    #[arg(short, long)]
    threads: Option<usize>,

    /// Уровень логирования
    #[arg(short, long)]
    log_level: Option<String>,

    /// Режим работы
    #[arg(short, long, default_value = "demo")]
    mode: RunMode,

    /// Размер входа для бенчмарка
    #[arg(long, default_value_t = 1_000_000)]
    size: usize,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum RunMode {
    /// Демонстрация операций
    Demo,
    /// Режим бенчмарков
    Benchmark,
    /// Режим проверки здоровья
    Health,
    /// Вывод конфигурации
    PrintConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(threads) = args.threads {
        config.pool.worker_threads = threads;
        config.executor.default_threads = threads;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    // Guard файлового логгера живёт до конца main
    let _log_guard = init_logging(&config.logging)?;

    info!("🦀 Запуск Chunked Executor v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("📋 Конфигурация загружена из {}", path);
    }

    info!("🎯 Режим работы: {:?}", args.mode);
    let result = match args.mode {
        RunMode::Demo => {
            info!("🧮 Запуск демонстрации");
            run_demo(&config)
        }
        RunMode::Benchmark => {
            info!("📊 Запуск бенчмарков");
            run_benchmarks(&config, args.size)
        }
        RunMode::Health => {
            info!("🏥 Запуск проверки здоровья");
            run_health_check(&config)
        }
        RunMode::PrintConfig => {
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("❌ Ошибка выполнения: {:#}", e);
        return result;
    }

    info!("✅ Программа завершена успешно");
    Ok(())
}

/// Инициализация системы логирования
fn init_logging(logging: &LoggingConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = logging
        .level
        .parse::<tracing::Level>()
        .map_err(|e| anyhow::anyhow!("Неверный уровень логирования: {}", e))?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    // Слой для консоли
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(false);

    // Слой для файла, если задана директория
    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .map_err(|e| anyhow::anyhow!("Не удалось создать директорию {}: {}", directory, e))?;

            let appender = tracing_appender::rolling::never(directory, &logging.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Метрики и пул по конфигурации
fn build_runtime(config: &Config) -> Result<(Option<MetricsCollector>, Arc<WorkerPool>)> {
    let metrics = if config.metrics.enabled {
        Some(MetricsCollector::new(&config.metrics)?)
    } else {
        None
    };

    let mut builder = WorkerPool::builder(config.pool.worker_threads).queue_capacity(config.pool.queue_capacity);
    if let Some(metrics) = &metrics {
        builder = builder.metrics(metrics.clone());
    }

    Ok((metrics, Arc::new(builder.build()?)))
}

/// Демонстрация всех операций на небольшом примере
fn run_demo(config: &Config) -> Result<()> {
    let (metrics, pool) = build_runtime(config)?;
    let executor = ChunkedExecutor::from_config(&config.executor, Some(Arc::clone(&pool)));
    let threads = executor.default_threads();

    let values: Arc<[i64]> = Arc::from(vec![5, 3, 8, 1, 9, 2]);
    info!("📥 Вход: {:?}, чанков: {}", values, threads);

    println!("map (x * x):     {:?}", executor.map(threads, Arc::clone(&values), |x| x * x)?);
    println!("filter (even):   {:?}", executor.filter(threads, Arc::clone(&values), |x| x % 2 == 0)?);
    println!("join:            {}", executor.join(threads, Arc::clone(&values))?);
    println!("sum:             {}", executor.reduce(threads, Arc::clone(&values), Monoid::new(0, |a, b| a + b))?);
    println!(
        "sum of squares:  {}",
        executor.map_reduce(threads, Arc::clone(&values), |x| x * x, Monoid::new(0, |a, b| a + b))?
    );
    println!("maximum:         {}", executor.maximum(threads, Arc::clone(&values), i64::cmp)?);
    println!("minimum:         {}", executor.minimum(threads, Arc::clone(&values), i64::cmp)?);
    println!("all (> 0):       {}", executor.all(threads, Arc::clone(&values), |x| *x > 0)?);
    println!("any (== 9):      {}", executor.any(threads, Arc::clone(&values), |x| *x == 9)?);
    println!("count (> 4):     {}", executor.count(threads, Arc::clone(&values), |x| *x > 4)?);

    let squares = pool.map(|x: i64| x * x, (1..=8).collect(), &CancellationToken::new())?;
    println!("pool map:        {:?}", squares);

    if let Some(metrics) = metrics {
        info!("📈 Метрики: {:?}", metrics.snapshot());
    }

    pool.close()?;
    Ok(())
}

/// Сравнение режима пула и режима временных потоков
fn run_benchmarks(config: &Config, size: usize) -> Result<()> {
    let (metrics, pool) = build_runtime(config)?;
    let threads = config.executor.default_threads;
    let values: Arc<[u64]> = (0..size as u64).collect::<Vec<_>>().into();
    let sum = Monoid::new(0u64, |a: u64, b: u64| a.wrapping_add(b));

    info!("📊 Вход: {} элементов, {} чанков", size, threads);

    let executors = [
        ("pool", ChunkedExecutor::with_pool(Arc::clone(&pool))),
        ("transient", ChunkedExecutor::new()),
    ];

    for (name, executor) in &executors {
        let started = Instant::now();
        let total = executor.map_reduce(threads, Arc::clone(&values), |x| x % 7, sum.clone())?;
        let reduce_elapsed = started.elapsed();

        let started = Instant::now();
        let largest = executor.maximum(threads, Arc::clone(&values), u64::cmp);
        let max_elapsed = started.elapsed();

        println!(
            "{:<10} map_reduce: {:.3?} (={})  maximum: {:.3?} ({:?})",
            name,
            reduce_elapsed,
            total,
            max_elapsed,
            largest.ok()
        );
    }

    if let Some(metrics) = metrics {
        println!("{}", metrics.export_metrics()?);
    }

    pool.close()?;
    println!("📈 Бенчмарки завершены");
    Ok(())
}

/// Проверка здоровья: запуск пробного батча на пуле
fn run_health_check(config: &Config) -> Result<()> {
    let (metrics, pool) = build_runtime(config)?;

    let started = Instant::now();
    let probe = pool.map(|x: usize| x + 1, (0..pool.threads()).collect(), &CancellationToken::new());
    let latency = started.elapsed();

    let states = pool.worker_states();
    pool.close()?;

    let report = serde_json::json!({
        "status": if probe.is_ok() { "ok" } else { "degraded" },
        "version": chunked_exec::API_VERSION,
        "worker_threads": states.len(),
        "queue_capacity": config.pool.queue_capacity,
        "probe_latency_ms": latency.as_secs_f64() * 1000.0,
        "probe_error": probe.err().map(|e| e.to_string()),
        "metrics": metrics.map(|m| m.snapshot()),
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
