use std::sync::Arc;

use basalt_common::config::EngineConfig;
use basalt_common::error::BasaltError;
use basalt_common::memory::MemoryAccountant;
use basalt_common::types::{ElemType, Scalar, ValueType};
use basalt_planner::{partition, CatalogStats, MitosisOutcome, SkipReason};
use basalt_storage::{Column, ColumnPool};
use basalt_vm::{
    interpreter, ops, Catalog, ExecEnv, OpSignature, ProgramBuilder, Value,
};

fn env() -> ExecEnv {
    let registry = basalt_vm::OpRegistry::new();
    ops::install(&registry);
    ExecEnv {
        registry,
        pool: ColumnPool::new(),
        catalog: Catalog::new(),
        acct: Arc::new(MemoryAccountant::unbounded()),
    }
}

fn load_base(env: &ExecEnv, name: &str, rows: usize) -> Vec<i64> {
    let values: Vec<i64> = (0..rows as i64).map(|v| v * 3 - 7).collect();
    let mut col = Column::new(&env.acct, ElemType::Lng, rows.max(1)).unwrap();
    for v in &values {
        col.append(&Scalar::Lng(*v)).unwrap();
    }
    env.catalog.register(name, env.pool.publish(col));
    values
}

/// bind -> scan -> (result var), returning the builder plus key var ids.
fn scan_program(name: &str) -> (ProgramBuilder, basalt_common::ids::VarId) {
    let mut b = ProgramBuilder::new();
    let n = b.constant(Value::Scalar(Scalar::Str(name.to_string())));
    let base = b.declare("base", ValueType::Column(ElemType::Lng));
    let scanned = b.declare("scanned", ValueType::Column(ElemType::Lng));
    b.emit("catalog", "bind", &[base], &[n]);
    b.emit("scan", "range", &[scanned], &[base]);
    (b, scanned)
}

/// Budget allowing 100 rows per piece: 800-byte memory ceiling over 8-byte
/// rows.
fn hundred_row_budget() -> EngineConfig {
    EngineConfig {
        mem_ceiling_bytes: 800,
        thread_count: 4,
        max_slices: 16,
        min_partition_rows: 100_000,
        ..EngineConfig::default()
    }
}

#[test]
fn nine_hundred_fifty_rows_on_four_threads_yield_twelve_pieces() {
    let env = env();
    let values = load_base(&env, "t.x", 950);
    let (b, scanned) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();

    let oracle = CatalogStats::new(Arc::clone(&env.catalog));
    let outcome = partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap();

    let MitosisOutcome::Sliced { program: sliced, pieces } = outcome else {
        panic!("expected a sliced program");
    };
    // ceil(ceil(950 / 100) / 4) * 4 = 12, within the [4, 16] clamp.
    assert_eq!(pieces, 12);
    assert!((4..=16).contains(&pieces));
    assert_eq!(sliced.pieces(), 12);

    let clone_count = sliced
        .instrs()
        .iter()
        .filter(|i| i.slice.is_some())
        .count();
    assert_eq!(clone_count, 12);

    // Every logical row lands in exactly one slice's output range.
    let frame = interpreter::run(&sliced, &env).unwrap();
    let packed = frame.get(scanned).as_column().unwrap().pin().unwrap();
    assert_eq!(packed.count(), 950);
    assert_eq!(packed.fixed_slice::<i64>().unwrap(), values.as_slice());
}

#[test]
fn sliced_execution_is_deterministic_across_runs() {
    let env = env();
    let values = load_base(&env, "t.x", 950);
    let (b, scanned) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));
    let MitosisOutcome::Sliced { program: sliced, .. } =
        partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap()
    else {
        panic!("expected a sliced program");
    };

    // Worker completion order varies run to run; the fan-in binds by slice
    // index, so the packed output never does.
    for _ in 0..4 {
        let frame = interpreter::run(&sliced, &env).unwrap();
        let packed = frame.get(scanned).as_column().unwrap().pin().unwrap();
        assert_eq!(packed.fixed_slice::<i64>().unwrap(), values.as_slice());
    }
}

#[test]
fn slice_ranges_are_disjoint_and_cover_the_column() {
    use basalt_vm::SliceSpec;
    for (count, of) in [(950usize, 12u64), (7, 4), (100, 100), (3, 8), (0, 4)] {
        let mut seen = vec![0u32; count];
        for index in 0..of {
            let (lo, hi) = SliceSpec { index, of }.bounds(count);
            for slot in &mut seen[lo..hi] {
                *slot += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1), "count={count} of={of}");
    }
}

#[test]
fn uniqueness_assertion_rejects_slicing_regardless_of_budget() {
    let env = env();
    load_base(&env, "t.x", 950);
    let (mut b, scanned) = scan_program("t.x");
    let checked = b.declare("checked", ValueType::Column(ElemType::Lng));
    b.emit("columns", "assert_key", &[checked], &[scanned]);
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let mut config = hundred_row_budget();
    config.pieces_override = Some(8);
    let outcome = partition(&program, &oracle, &env.registry, &config).unwrap();
    assert_eq!(outcome.pieces(), 0);
    let MitosisOutcome::Unchanged { reason } = outcome else {
        panic!("expected unchanged program");
    };
    assert_eq!(
        reason,
        SkipReason::Unsafe {
            op: "columns.assert_key".to_string()
        }
    );
}

#[test]
fn grouping_and_nonrecombinable_aggregates_reject_slicing() {
    let env = env();
    load_base(&env, "t.x", 950);
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));
    let config = hundred_row_budget();

    for (module, function, ret_type) in [
        ("group", "id", ValueType::Column(ElemType::Oid)),
        ("aggr", "median", ValueType::Scalar(ElemType::Lng)),
    ] {
        let (mut b, scanned) = scan_program("t.x");
        let out = b.declare("out", ret_type);
        b.emit(module, function, &[out], &[scanned]);
        let program = b.freeze(&env.registry).unwrap();
        let outcome = partition(&program, &oracle, &env.registry, &config).unwrap();
        assert_eq!(outcome.pieces(), 0, "{module}.{function}");
    }
}

#[test]
fn recombinable_aggregate_still_slices() {
    let env = env();
    let values = load_base(&env, "t.x", 950);
    let (mut b, scanned) = scan_program("t.x");
    let total = b.declare("total", ValueType::Scalar(ElemType::Lng));
    b.emit("aggr", "sum", &[total], &[scanned]);
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let outcome = partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap();
    let MitosisOutcome::Sliced { program: sliced, .. } = outcome else {
        panic!("expected a sliced program");
    };
    let frame = interpreter::run(&sliced, &env).unwrap();
    let expected: i64 = values.iter().sum();
    match frame.get(total) {
        Value::Scalar(Scalar::Lng(v)) => assert_eq!(*v, expected),
        other => panic!("expected lng total, got {other:?}"),
    }
}

#[test]
fn foreign_aggregate_rejects_slicing() {
    let env = env();
    load_base(&env, "t.x", 950);
    env.registry.register(ops::foreign_aggregate(
        "pyapi",
        "aggregate",
        OpSignature::new(vec![ValueType::ColumnAny], vec![ValueType::Any]),
        Arc::new(|_ctx, _args| Ok(vec![Value::Scalar(Scalar::Lng(0))])),
    ));

    let (mut b, scanned) = scan_program("t.x");
    let out = b.declare("out", ValueType::Scalar(ElemType::Lng));
    b.emit("pyapi", "aggregate", &[out], &[scanned]);
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let outcome =
        partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap();
    assert_eq!(outcome.pieces(), 0);
}

#[test]
fn program_without_sliceable_access_reports_no_target() {
    let env = env();
    load_base(&env, "t.x", 950);
    let mut b = ProgramBuilder::new();
    let n = b.constant(Value::Scalar(Scalar::Str("t.x".to_string())));
    let base = b.declare("base", ValueType::Column(ElemType::Lng));
    b.emit("catalog", "bind", &[base], &[n]);
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let outcome = partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap();
    let MitosisOutcome::Unchanged { reason } = outcome else {
        panic!("expected unchanged program");
    };
    assert_eq!(reason, SkipReason::NoTarget);
}

#[test]
fn small_scan_fits_one_piece() {
    let env = env();
    load_base(&env, "t.x", 50);
    let (b, _) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let outcome = partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap();
    let MitosisOutcome::Unchanged { reason } = outcome else {
        panic!("expected unchanged program");
    };
    assert_eq!(reason, SkipReason::BudgetFitsOnePiece { rows: 50 });
}

#[test]
fn explicit_piece_override_takes_precedence() {
    let env = env();
    let values = load_base(&env, "t.x", 950);
    let (b, scanned) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    let mut config = hundred_row_budget();
    config.pieces_override = Some(6);
    let outcome = partition(&program, &oracle, &env.registry, &config).unwrap();
    let MitosisOutcome::Sliced { program: sliced, pieces } = outcome else {
        panic!("expected a sliced program");
    };
    assert_eq!(pieces, 6);

    let frame = interpreter::run(&sliced, &env).unwrap();
    let packed = frame.get(scanned).as_column().unwrap().pin().unwrap();
    assert_eq!(packed.fixed_slice::<i64>().unwrap(), values.as_slice());
}

#[test]
fn slice_byte_override_drives_the_formula() {
    let env = env();
    load_base(&env, "t.x", 950);
    let (b, _) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    // 80-byte rows against the same 800-byte ceiling: 10 rows per piece,
    // ceil(ceil(950/10)/4)*4 = 96, clamped to max_slices = 16.
    let mut config = hundred_row_budget();
    config.slice_row_bytes_override = Some(80);
    let outcome = partition(&program, &oracle, &env.registry, &config).unwrap();
    assert_eq!(outcome.pieces(), 16);
}

#[test]
fn rewrite_failure_is_fatal_and_preserves_the_original() {
    let env = env();
    let values = load_base(&env, "t.x", 950);
    let (b, scanned) = scan_program("t.x");
    let program = b.freeze(&env.registry).unwrap();
    let oracle = CatalogStats::new(Arc::clone(&env.catalog));

    // The rewritten program needs the fan-in; without it the mandatory
    // re-check must fail loudly instead of handing back a broken program.
    env.registry.deregister("columns", "pack");
    let err = partition(&program, &oracle, &env.registry, &hundred_row_budget()).unwrap_err();
    assert!(matches!(err, BasaltError::OptimizerTypecheckFailed(_)));

    // The caller still holds the original, which executes unsliced.
    let frame = interpreter::run(&program, &env).unwrap();
    let packed = frame.get(scanned).as_column().unwrap().pin().unwrap();
    assert_eq!(packed.fixed_slice::<i64>().unwrap(), values.as_slice());
}
