use criterion::{black_box, criterion_group, criterion_main, Criterion};

use docsnap::signature::StrokePoint;
use docsnap::{
    capture, paginate, serialize, Bitmap, CaptureOptions, JpegQuality, PadOptions, PageSpec,
    RenderRegion, ResourceCache, SignaturePad,
};

fn payslip_html(rows: usize) -> String {
    let mut html = String::from("<body><section id=doc><h1>Holerite</h1><table>");
    for i in 0..rows {
        html.push_str(&format!("<tr><td>Item {}</td><td>{},00</td></tr>", i, i * 37));
    }
    html.push_str("</table><p>Fim do documento.</p></section></body>");
    html
}

fn bench_capture(c: &mut Criterion) {
    let region = RenderRegion::new(payslip_html(40), 600).with_selector("#doc");
    let opts = CaptureOptions::default();
    let loader = ResourceCache::new();
    c.bench_function("capture_payslip", |b| {
        b.iter(|| capture(black_box(&region), &opts, &loader).unwrap())
    });
}

fn bench_export(c: &mut Criterion) {
    let bitmap = Bitmap::filled(1200, 5000, [250, 250, 250]).unwrap();
    c.bench_function("paginate_and_serialize", |b| {
        b.iter(|| {
            let artifact = paginate(bitmap.clone(), PageSpec::A4, "bench.pdf");
            serialize(&artifact, JpegQuality::MAX).unwrap()
        })
    });
}

fn bench_signature(c: &mut Criterion) {
    c.bench_function("signature_stroke_and_export", |b| {
        b.iter(|| {
            let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
            pad.open(400, 150).unwrap();
            pad.pen_down();
            for i in 0..60u64 {
                let x = 10.0 + i as f32 * 6.0;
                pad.record_point(StrokePoint::new(x, 75.0 + (x / 20.0).sin() * 30.0, i * 8));
            }
            pad.pen_up();
            pad.export().unwrap()
        })
    });
}

criterion_group!(benches, bench_capture, bench_export, bench_signature);
criterion_main!(benches);
