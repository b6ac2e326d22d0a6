mod common;

use common::{mni_volume, NiftiBuilder, ScriptedFetcher};
use nifti_overlay_viewer::compositor::Presentation;
use nifti_overlay_viewer::net::Resource;
use nifti_overlay_viewer::{
    Axis, CoordinateBus, DisplayConfig, FieldState, MapParams, MmCoord, ThresholdMode,
    ViewerConfig, ViewerSession,
};

const API: &str = "http://api.test";

fn config() -> ViewerConfig {
    ViewerConfig {
        api_base: API.to_string(),
        background_source: "static/mni_2mm.nii.gz".to_string(),
        param_debounce_secs: 0.35,
        initial_query: None,
        display: DisplayConfig::default(),
        map: MapParams::default(),
    }
}

fn session() -> (ViewerSession, ScriptedFetcher, CoordinateBus) {
    let fetcher = ScriptedFetcher::default();
    let bus = CoordinateBus::default();
    let session = ViewerSession::new(config(), Box::new(fetcher.clone()), &bus);
    (session, fetcher, bus)
}

/// Session with the MNI background already installed.
fn loaded() -> (ViewerSession, ScriptedFetcher, CoordinateBus) {
    let (mut s, f, bus) = session();
    s.start();
    f.ok(f.last(Resource::Background), mni_volume(0.5));
    s.poll(0.0);
    (s, f, bus)
}

fn small_overlay(value: f32) -> Vec<u8> {
    NiftiBuilder::f32(&[4, 5, 6], &vec![value; 120]).build_gz()
}

#[test]
fn background_arrival_centres_cursor() {
    let (mut s, f, _bus) = session();
    s.start();
    assert_eq!(f.len(), 1);
    assert_eq!(f.url(0), "static/mni_2mm.nii.gz");
    assert!(s.background_status().loading);
    assert!(s.compose(Axis::Z).is_none());

    f.ok(0, mni_volume(0.5));
    assert!(s.poll(0.0));

    assert!(!s.background_status().loading);
    assert!(s.grid().unwrap().is_mni_2mm());
    assert_eq!(s.cursor().indices(), [45, 54, 45]);
    assert_eq!(s.cursor().text(Axis::X), "0");
    assert_eq!(s.cursor().text(Axis::Y), "-18");
    assert_eq!(s.cursor().text(Axis::Z), "18");

    let [axial, coronal, sagittal] = s.compose_views();
    let axial = axial.unwrap();
    assert_eq!(axial.image.dimensions(), (91, 109));
    assert_eq!(axial.crosshair, (45, 54));
    assert_eq!(coronal.unwrap().image.dimensions(), (91, 91));
    assert_eq!(sagittal.unwrap().image.dimensions(), (109, 91));
}

#[test]
fn external_request_before_load_is_applied_on_arrival() {
    let (mut s, f, bus) = session();
    s.start();
    bus.publish(MmCoord::new(-22.0, -4.0, 18.0));
    s.poll(0.0);
    assert_eq!(s.cursor().pending(), Some(MmCoord::new(-22.0, -4.0, 18.0)));
    assert_eq!(s.cursor().text(Axis::X), "-22");

    f.ok(0, mni_volume(0.5));
    s.poll(0.0);
    assert_eq!(s.cursor().indices(), [56, 61, 45]);
    assert_eq!(s.cursor().pending(), None);
}

#[test]
fn external_request_after_load_jumps() {
    let (mut s, _f, bus) = loaded();
    bus.publish(MmCoord::new(-22.0, -4.0, 18.0));
    assert!(s.poll(0.0));
    assert_eq!(s.cursor().indices(), [56, 61, 45]);
    assert_eq!(s.cursor().text(Axis::Y), "-4");
}

#[test]
fn query_requests_map_and_peak() {
    let (mut s, f, _bus) = loaded();
    s.set_query("  working memory ");
    assert_eq!(s.query(), Some("working memory"));

    let overlay = f.last(Resource::Overlay);
    assert_eq!(
        f.url(overlay),
        "http://api.test/query/working%20memory/nii?voxel=2&fwhm=10&kernel=gauss&r=6"
    );
    assert_eq!(s.overlay_url(), Some(f.url(overlay).as_str()));
    assert!(s.overlay_status().loading);

    let peak = f.last(Resource::Peak);
    assert_eq!(
        f.url(peak),
        "http://api.test/query/working%20memory/locations?limit=1"
    );
    f.ok(peak, br#"{"results":[{"x":-22,"y":-4,"z":18}]}"#.to_vec());
    s.poll(0.0);
    assert_eq!(s.cursor().indices(), [56, 61, 45]);
}

#[test]
fn superseded_peak_reply_is_ignored() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let first = f.last(Resource::Peak);
    s.set_query("reward");
    let second = f.last(Resource::Peak);
    assert!(f.is_cancelled(first));

    f.ok(second, br#"{"results":[{"x":-22,"y":-4,"z":18}]}"#.to_vec());
    f.ok(first, br#"{"results":[{"x":40,"y":20,"z":-10}]}"#.to_vec());
    s.poll(0.0);
    assert_eq!(s.cursor().indices(), [56, 61, 45]);
    assert_eq!(s.cursor().text(Axis::X), "-22");
}

#[test]
fn repeating_the_query_does_not_refetch() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let n = f.len();
    s.set_query("pain ");
    assert_eq!(f.len(), n);
}

#[test]
fn only_the_latest_overlay_is_installed() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let first = f.last(Resource::Overlay);
    s.set_query("reward");
    let second = f.last(Resource::Overlay);
    assert_ne!(first, second);
    assert!(f.is_cancelled(first));
    assert!(!f.is_cancelled(second));

    f.ok(second, mni_volume(2.0));
    f.ok(first, mni_volume(7.0));
    s.poll(0.0);

    let overlay = s.overlay().unwrap();
    assert_eq!(overlay.value_range(), (2.0, 2.0));
    assert!(!s.overlay_status().loading);
}

#[test]
fn stale_reply_before_current_is_ignored() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let first = f.last(Resource::Overlay);
    s.set_query("reward");
    let second = f.last(Resource::Overlay);

    f.ok(first, mni_volume(7.0));
    s.poll(0.0);
    assert!(s.overlay().is_none());
    assert!(s.overlay_status().loading);

    f.ok(second, mni_volume(2.0));
    s.poll(0.0);
    assert_eq!(s.overlay().unwrap().value_range(), (2.0, 2.0));
}

#[test]
fn overlay_tints_passing_voxels() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), mni_volume(2.0));
    s.poll(0.0);

    assert_eq!(s.threshold(), Some(2.0));
    let axial = s.compose(Axis::Z).unwrap();
    // Flat background is black; alpha 0.5 toward red.
    assert_eq!(axial.image.get_pixel(0, 0).0, [127, 0, 0, 255]);
    assert_eq!(axial.image.get_pixel(45, 54).0, [127, 0, 0, 255]);
}

#[test]
fn failed_overlay_reports_status_and_keeps_background() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    f.fail(f.last(Resource::Overlay), 500);
    s.poll(0.0);

    let status = s.overlay_status();
    assert!(!status.loading);
    assert!(status.error.unwrap().contains("500"));
    assert!(s.overlay().is_none());
    assert!(s.background().is_some());
    assert!(s.compose(Axis::Z).is_some());
}

#[test]
fn undecodable_overlay_reports_status() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), b"<html>not found</html>".to_vec());
    s.poll(0.0);
    assert!(s.overlay_status().error.is_some());
    assert!(s.overlay().is_none());
}

#[test]
fn mismatched_overlay_is_not_drawn() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), small_overlay(5.0));
    s.poll(0.0);

    assert!(s.overlay().is_some());
    assert!(s.grid().unwrap().is_mni_2mm());
    let axial = s.compose(Axis::Z).unwrap();
    let [r, g, b, _] = axial.image.get_pixel(0, 0).0;
    assert_eq!((r, g, b), (0, 0, 0));
}

#[test]
fn overlay_defines_grid_without_background() {
    let (mut s, f, _bus) = session();
    s.start();
    f.fail(0, 404);
    s.poll(0.0);
    assert!(s.background_status().error.is_some());
    assert!(s.grid().is_none());

    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), small_overlay(1.0));
    s.poll(0.0);
    let grid = s.grid().unwrap();
    assert_eq!(grid.dims, [4, 5, 6]);
    assert_eq!(s.cursor().indices(), [2, 2, 3]);
    assert!(s.compose(Axis::X).is_some());
}

#[test]
fn empty_query_clears_overlay() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), mni_volume(1.0));
    s.poll(0.0);
    assert!(s.overlay().is_some());

    s.set_query("   ");
    assert_eq!(s.query(), None);
    assert!(s.overlay().is_none());
    assert_eq!(s.overlay_url(), None);
    assert_eq!(s.threshold(), None);
}

#[test]
fn map_params_are_debounced() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let before = f.len();

    let params = MapParams {
        fwhm: 12.0,
        ..MapParams::default()
    };
    s.set_map_params(params, 10.0);
    assert!(s.has_pending_params());
    assert_eq!(s.map_params(), params);
    s.poll(10.2);
    assert_eq!(f.len(), before);

    s.poll(10.4);
    assert!(!s.has_pending_params());
    assert_eq!(f.len(), before + 1);
    assert!(f.url(f.last(Resource::Overlay)).contains("fwhm=12"));
}

#[test]
fn burst_of_param_edits_fetches_once() {
    let (mut s, f, _bus) = loaded();
    s.set_query("pain");
    let before = f.len();
    for (i, fwhm) in [11.0, 12.0, 13.0].into_iter().enumerate() {
        let params = MapParams {
            fwhm,
            ..MapParams::default()
        };
        s.set_map_params(params, i as f64 * 0.1);
        s.poll(i as f64 * 0.1);
    }
    s.poll(1.0);
    assert_eq!(f.len(), before + 1);
    assert!(f.url(f.last(Resource::Overlay)).contains("fwhm=13"));
}

#[test]
fn threshold_value_is_clamped_to_new_overlay() {
    let (mut s, f, _bus) = loaded();
    s.set_display(DisplayConfig {
        threshold_mode: ThresholdMode::Value,
        threshold_value: 100.0,
        ..DisplayConfig::default()
    });
    s.set_query("pain");
    f.ok(f.last(Resource::Overlay), mni_volume(3.0));
    s.poll(0.0);
    assert_eq!(s.display().threshold_value, 3.0);
    assert_eq!(s.threshold(), Some(3.0));
}

#[test]
fn typed_coordinates_commit_or_wait() {
    let (mut s, _f, _bus) = loaded();
    s.edit_coord(Axis::X, "-");
    assert!(!s.commit_coord(Axis::X));
    assert_eq!(s.cursor().state(Axis::X), FieldState::Editing);
    assert_eq!(s.cursor().index(Axis::X), 45);

    s.edit_coord(Axis::X, "-2");
    assert!(s.commit_coord(Axis::X));
    assert_eq!(s.cursor().index(Axis::X), 46);
    assert_eq!(s.cursor().text(Axis::X), "-2");
}

#[test]
fn surface_click_maps_through_presentation() {
    let (mut s, _f, _bus) = loaded();
    // Axial 91x109 on a 218 px square: scale 2, horizontal margin 18.
    let p = Presentation::fit(91, 109, 218.0, 1.0).unwrap();
    assert!(!s.click_surface(Axis::Z, &p, 5.0, 100.0));
    assert_eq!(s.cursor().indices(), [45, 54, 45]);

    assert!(s.click_surface(Axis::Z, &p, 18.0, 0.0));
    assert_eq!(s.cursor().indices(), [90, 108, 45]);
    assert_eq!(s.cursor().text(Axis::X), "-90");
}

#[test]
fn stepping_moves_one_axis() {
    let (mut s, _f, _bus) = loaded();
    s.step_slice(Axis::Z, 3);
    assert_eq!(s.cursor().indices(), [45, 54, 48]);
    assert_eq!(s.cursor().text(Axis::Z), "24");
}

#[test]
fn local_background_supersedes_fetch() {
    let (mut s, f, _bus) = session();
    s.start();
    let local = NiftiBuilder::u8(&[3, 3, 3], &[9; 27]).build();
    s.load_background_bytes("local.nii", &local);
    assert!(f.is_cancelled(0));
    assert_eq!(s.grid().unwrap().dims, [3, 3, 3]);

    f.ok(0, mni_volume(0.5));
    s.poll(0.0);
    assert_eq!(s.grid().unwrap().dims, [3, 3, 3]);
}

#[test]
fn initial_query_loads_on_start() {
    let fetcher = ScriptedFetcher::default();
    let bus = CoordinateBus::default();
    let mut cfg = config();
    cfg.initial_query = Some("pain".to_string());
    let mut s = ViewerSession::new(cfg, Box::new(fetcher.clone()), &bus);
    s.start();
    let kinds: Vec<_> = (0..fetcher.len()).map(|i| fetcher.resource(i)).collect();
    assert_eq!(kinds, [Resource::Background, Resource::Overlay, Resource::Peak]);
}
