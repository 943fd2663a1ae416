//! Renders on a real device and checks the pixels that come back.

use image::Rgba;
use vellum_test::{compare_images, HeadlessRenderer};

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn clear_to_red_reads_back_red() {
    let mut renderer = HeadlessRenderer::new(256, 256).unwrap();

    let output = renderer.render_clear([1.0, 0.0, 0.0, 1.0]).unwrap();

    assert_eq!(output.dimensions(), (256, 256));
    assert!(output.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn consecutive_clears_do_not_leak_into_each_other() {
    let mut renderer = HeadlessRenderer::new(64, 64).unwrap();

    let blue = renderer.render_clear([0.0, 0.0, 1.0, 1.0]).unwrap();
    let green = renderer.render_clear([0.0, 1.0, 0.0, 1.0]).unwrap();
    let blue_again = renderer.render_clear([0.0, 0.0, 1.0, 1.0]).unwrap();

    assert!(compare_images(&blue, &green).unwrap() > 0.1);
    assert_eq!(compare_images(&blue, &blue_again).unwrap(), 0.0);
}
