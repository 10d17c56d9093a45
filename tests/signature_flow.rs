use docsnap::signature::{StrokePath, StrokePoint};
use docsnap::{
    capture, generate_pdf, decode_page_count, CaptureOptions, Error, ExportConfig,
    NotificationCategory, PadOptions, PadState, PointerEvent, RenderRegion, ResourceCache,
    SignaturePad,
};

fn scribble(pad: &mut SignaturePad) {
    let sub = pad.open(300, 100).unwrap();
    let mut t = 0;
    pad.handle(&sub, PointerEvent::Down(StrokePoint::new(20.0, 60.0, t)));
    for i in 1..20 {
        t += 16;
        let x = 20.0 + i as f32 * 12.0;
        let y = 50.0 + (i as f32 * 0.7).sin() * 20.0;
        pad.handle(&sub, PointerEvent::Move(StrokePoint::new(x, y, t)));
    }
    pad.handle(&sub, PointerEvent::Up(StrokePoint::new(270.0, 40.0, t + 16)));
}

#[test]
fn blank_pad_cannot_be_exported() {
    let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
    pad.open(300, 100).unwrap();
    let err = pad.export().unwrap_err();
    assert!(matches!(err, Error::EmptySignatureError));
    assert_eq!(err.category(), NotificationCategory::EmptySignature);
}

#[test]
fn clear_always_removes_ink() {
    let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
    scribble(&mut pad);
    assert_eq!(pad.state(), PadState::HasInk);
    pad.clear();
    assert!(!pad.has_ink());
    assert!(matches!(pad.export(), Err(Error::EmptySignatureError)));
}

#[test]
fn signature_is_embedded_into_the_document() {
    let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
    scribble(&mut pad);
    let signature = pad.export().unwrap();
    assert_eq!((signature.width, signature.height), (600, 200));

    let contract = |img: &str| {
        let html = format!(
            r#"<body><div id="contract"><h1>Contrato</h1><p>Li e concordo.</p>{}</div></body>"#,
            img
        );
        RenderRegion::new(html, 640).with_selector("#contract")
    };
    let dark_pixels = |region: &RenderRegion| {
        capture(region, &CaptureOptions::default(), &ResourceCache::new())
            .unwrap()
            .as_image()
            .pixels()
            .filter(|p| p.0.iter().all(|&c| c < 128))
            .count()
    };
    let unsigned = contract(r#"<p>Assinatura:</p>"#);
    let region = contract(&format!(
        r#"<p>Assinatura:</p><img src="{}" width="300" height="100">"#,
        signature.to_data_url()
    ));
    assert!(dark_pixels(&region) > dark_pixels(&unsigned));

    let pdf = generate_pdf(&region, &ExportConfig::default(), &ResourceCache::new()).unwrap();
    assert_eq!(decode_page_count(pdf.as_bytes()).unwrap(), 1);
}

#[test]
fn saved_strokes_restore_the_same_image() {
    let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
    scribble(&mut pad);
    let json = serde_json::to_string(pad.strokes()).unwrap();
    let original = pad.export().unwrap();

    let strokes: Vec<StrokePath> = serde_json::from_str(&json).unwrap();
    let mut restored = SignaturePad::new(PadOptions::default()).unwrap();
    restored.open(300, 100).unwrap();
    restored.load_strokes(strokes);
    assert_eq!(restored.export().unwrap(), original);
}

#[test]
fn reopening_keeps_a_single_copy_of_each_stroke() {
    let mut pad = SignaturePad::new(PadOptions::default()).unwrap();
    let first = pad.open(300, 100).unwrap();
    let second = pad.open(300, 100).unwrap();
    let down = PointerEvent::Down(StrokePoint::new(10.0, 10.0, 0));
    let up = PointerEvent::Up(StrokePoint::new(60.0, 10.0, 20));
    for sub in [&first, &second] {
        pad.handle(sub, down);
        pad.handle(sub, up);
    }
    assert_eq!(pad.strokes().len(), 1);
    assert_eq!(pad.strokes()[0].len(), 2);
}
