use docsnap::{decode_page_count, paginate, serialize, Bitmap, JpegQuality, PageSpec};

fn bitmap(w: u32, h: u32) -> Bitmap {
    Bitmap::filled(w, h, [250, 250, 250]).unwrap()
}

#[test]
fn short_bitmaps_fit_one_page() {
    // height/width * 210 <= 297
    for (w, h) in [(1000, 1000), (1000, 1414), (210, 297), (800, 10)] {
        let artifact = paginate(bitmap(w, h), PageSpec::A4, "short.pdf");
        assert_eq!(artifact.page_count(), 1, "{}x{}", w, h);
        assert_eq!(artifact.pages()[0].offset_mm, 0.0);
    }
}

#[test]
fn page_count_is_ceiling_of_scaled_height() {
    for (w, h) in [(1000, 1500), (1000, 4000), (600, 5000), (210, 1000)] {
        let artifact = paginate(bitmap(w, h), PageSpec::A4, "tall.pdf");
        let k = artifact.image_height_mm() / PageSpec::A4.height_mm;
        assert_eq!(artifact.page_count(), k.ceil() as usize, "{}x{}", w, h);
    }
}

#[test]
fn offsets_shift_by_one_page_height() {
    let artifact = paginate(bitmap(1000, 4000), PageSpec::A4, "b.pdf");
    assert!((artifact.image_height_mm() - 840.0).abs() < 1e-9);
    assert_eq!(artifact.page_count(), 3);
    for pair in artifact.pages().windows(2).skip(1) {
        let step = pair[0].offset_mm - pair[1].offset_mm;
        assert!((step - 297.0).abs() < 1e-9);
    }
    // the last page shows the bottom of the image
    let last = artifact.pages().last().unwrap();
    assert!(last.offset_mm + artifact.image_height_mm() > 0.0);
    assert!(last.offset_mm + artifact.image_height_mm() <= 297.0 + 1e-9);
}

#[test]
fn custom_page_geometry() {
    let letter = PageSpec {
        width_mm: 215.9,
        height_mm: 279.4,
    };
    let artifact = paginate(bitmap(500, 2000), letter, "letter.pdf");
    assert!((artifact.image_width_mm() - 215.9).abs() < 1e-9);
    assert_eq!(artifact.page_count(), 4);
}

#[test]
fn serialized_page_count_matches_artifact() {
    for (w, h) in [(400, 400), (400, 1700), (300, 2400)] {
        let artifact = paginate(bitmap(w, h), PageSpec::A4, "rt.pdf");
        let blob = serialize(&artifact, JpegQuality::from_unit(0.9)).unwrap();
        assert_eq!(decode_page_count(blob.as_bytes()).unwrap(), artifact.page_count());
    }
}
