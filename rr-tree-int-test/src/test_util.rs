use rr_tree::{BoundingBox, DataObject, RRTree, RRTreeConfig, RRTreeError, RRTreeResult};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;
use std::{env, fs};

/// Runs a test against a fresh context. `after` runs even when the test
/// fails, so the tree file is always cleaned up.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    B: Fn() -> RRTreeResult<TestContext>,
    T: Fn(&mut TestContext) -> RRTreeResult<()>,
    A: Fn(TestContext) -> RRTreeResult<()>,
{
    let start_time = Instant::now();
    let mut ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| test(&mut ctx)));
    let path = ctx.path().to_path_buf();
    let after_result = after(ctx);
    let elapsed = start_time.elapsed();

    let failure = match outcome {
        Ok(Ok(())) => match after_result {
            Ok(()) => return,
            Err(e) => format!("After run failed: {:?}", e),
        },
        Ok(Err(e)) => format!("Test failed: {:?}", e),
        Err(panic_err) => {
            if let Some(s) = panic_err.downcast_ref::<&str>() {
                format!("Panic: {}", s)
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                format!("Panic: {}", s)
            } else {
                "Panic: unknown payload".to_string()
            }
        }
    };

    let _ = fs::remove_file(&path);
    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Tree file: {:?} (took {:?})", path, elapsed);
    eprintln!("Error: {}", failure);
    let bt = Backtrace::capture().to_string();
    if !bt.is_empty() && !bt.contains("disabled") {
        eprintln!("\nBacktrace:\n{}", bt);
    }
    eprintln!("=====================================================\n");
    panic!("{}", failure);
}

pub struct TestContext {
    path: PathBuf,
    tree: RRTree,
    config: RRTreeConfig,
}

impl TestContext {
    pub fn new(path: PathBuf, tree: RRTree, config: RRTreeConfig) -> Self {
        Self { path, tree, config }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&mut self) -> &mut RRTree {
        &mut self.tree
    }

    pub fn config(&self) -> &RRTreeConfig {
        &self.config
    }

    /// Closes the tree and opens the file again.
    pub fn reopen(&mut self) -> RRTreeResult<()> {
        if !self.tree.is_closed() {
            self.tree.close()?;
        }
        self.tree = RRTree::open(&self.path, self.config.clone())?;
        Ok(())
    }
}

pub fn random_path() -> PathBuf {
    let id = uuid::Uuid::new_v4();
    env::temp_dir().join(format!("{}.rrt", id))
}

/// Small nodes and a small buffer, so a few dozen updates already build a
/// multi-level tree and trigger several emptyings.
pub fn small_config() -> RRTreeConfig {
    RRTreeConfig::new()
        .with_node_capacity(2, 6)
        .with_max_buffer_size(16)
        .with_cache_pages(32)
}

pub fn create_test_context(config: RRTreeConfig) -> RRTreeResult<TestContext> {
    let path = random_path();
    if path.exists() {
        fs::remove_file(&path)?;
    }
    let tree = RRTree::create(&path, config.clone())?;
    Ok(TestContext::new(path, tree, config))
}

/// Closes the tree if still open, checks its structure and removes the file.
pub fn cleanup(mut ctx: TestContext) -> RRTreeResult<()> {
    let result = match ctx.tree.close() {
        Ok(()) | Err(RRTreeError::Closed) => Ok(()),
        Err(e) => Err(e),
    };
    drop(ctx.tree);
    fs::remove_file(&ctx.path)?;
    result
}

pub fn object(id: u64, x: f64, y: f64) -> DataObject {
    DataObject::new(id, BoundingBox::new(x, y, x + 1.0, y + 1.0))
}

pub fn sorted_ids(objects: &[DataObject]) -> Vec<u64> {
    let mut ids: Vec<u64> = objects.iter().map(|o| o.id).collect();
    ids.sort_unstable();
    ids
}

/// Ids of the objects in `model` intersecting `region`, sorted.
pub fn expected_ids(model: &HashMap<u64, DataObject>, region: &BoundingBox) -> Vec<u64> {
    let mut ids: Vec<u64> = model
        .values()
        .filter(|o| o.bbox.intersects(region))
        .map(|o| o.id)
        .collect();
    ids.sort_unstable();
    ids
}
