use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use chainscript::ledger::{LedgerContext, LedgerHost, MemoryLedger};
use chainscript::protocol::{Account, LedgerHeader};
use chainscript::runtime::marshal;
use chainscript::{CheckStrictness, ContractManager, ContractParameter, ENGINE_JS};

fn bench_parameter(code: &str, ledger: &Arc<MemoryLedger>) -> ContractParameter {
    ContractParameter {
        code: code.to_string(),
        input: "input".to_string(),
        sender: "addr-sender".to_string(),
        this_address: "addr-contract".to_string(),
        ope_index: 0,
        trigger_tx: "{}".to_string(),
        consensus_value: "{}".to_string(),
        ledger_context: Some(LedgerContext::shared_with_frame()),
        ledger: Some(ledger.clone() as Arc<dyn LedgerHost>),
    }
}

fn bench_execute_trivial(c: &mut Criterion) {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.put_account(Account::new("addr-contract"));
    ledger.put_header(LedgerHeader {
        seq: 1,
        ..Default::default()
    });
    let code = r#"function main(input) { callBackLog("tick:" + input); }"#;

    c.bench_function("execute_trivial_contract", |b| {
        b.iter(|| {
            let parameter = bench_parameter(black_box(code), &ledger);
            ContractManager::instance()
                .execute(ENGINE_JS, parameter)
                .unwrap();
        })
    });
}

fn bench_source_check(c: &mut Criterion) {
    let code = r#"function main(input) {
        var total = 0;
        for (var i = 0; i < 10; i++) { total += i; }
        return total;
    }"#;

    c.bench_function("source_check_compile_only", |b| {
        b.iter(|| {
            ContractManager::instance()
                .source_code_check(ENGINE_JS, black_box(code), CheckStrictness::CompileOnly)
                .unwrap();
        })
    });
}

fn bench_marshal_round_trip(c: &mut Criterion) {
    c.bench_function("marshal_number_round_trip", |b| {
        b.iter(|| {
            let tagged = marshal::tag_number(black_box(123.456789));
            let back = marshal::number_from_tag(&tagged).unwrap();
            black_box(back);
        })
    });
}

criterion_group!(
    benches,
    bench_execute_trivial,
    bench_source_check,
    bench_marshal_round_trip
);
criterion_main!(benches);
