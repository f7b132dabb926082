use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use psys_commons::CellId;
use psys_dynamic::{
    process_group::process_group_sizeof, AdmissionControl, BufferSet, Generation, KernelBitmap,
    ProcessGroup, ProcessGroupCmd, ProgramGroupManifest, ProgramGroupParam,
};

const ISP_PIPELINE: &str = include_str!("../../demos/isp_pipeline.json");

struct AcceptAll;

impl AdmissionControl for AcceptAll {
    fn can_submit(&self, _group: &ProcessGroup) -> bool {
        return true;
    }
    fn can_start(&self, _group: &ProcessGroup) -> bool {
        return true;
    }
    fn can_enqueue(&self, _group: &ProcessGroup, _buffer_set: &BufferSet) -> bool {
        return true;
    }
}

fn manifest() -> ProgramGroupManifest {
    return serde_json::from_str(ISP_PIPELINE).expect("demo manifest should parse");
}

fn layout_benchmark(c: &mut Criterion) {
    let manifest = manifest();
    let model = Generation::Ipu6ep.model();
    let mut group = c.benchmark_group("process group layout");
    for kernels in [&[0u8, 1, 3][..], &[0, 1, 2, 3][..]] {
        let param = ProgramGroupParam::new(KernelBitmap::from_kernels(kernels));
        group.bench_with_input(
            BenchmarkId::new("sizeof", kernels.len()),
            &param,
            |b, param| {
                b.iter(|| {
                    process_group_sizeof(model, &manifest, param).expect("sizing should pass")
                })
            },
        );
        group.bench_with_input(
            BenchmarkId::new("create", kernels.len()),
            &param,
            |b, param| {
                b.iter(|| ProcessGroup::create(model, &manifest, param).expect("create should pass"))
            },
        );
    }
    group.finish();
}

fn cell_claim_benchmark(c: &mut Criterion) {
    let manifest = manifest();
    let param = ProgramGroupParam::new(KernelBitmap::from_kernels(&[0, 1, 2, 3]));
    let mut group = ProcessGroup::create(Generation::Ipu6ep.model(), &manifest, &param)
        .expect("create should pass");
    group
        .exec_cmd(ProcessGroupCmd::Submit, &AcceptAll)
        .expect("submit should pass");
    c.bench_function("set and clear cell", |b| {
        b.iter(|| {
            let mut process = group.process_mut(1).expect("process should exist");
            process.set_cell(CellId(3)).expect("cell should be free");
            process.clear_cell().expect("cell should be held");
        })
    });
}

criterion_group!(benches, layout_benchmark, cell_claim_benchmark);
criterion_main!(benches);
