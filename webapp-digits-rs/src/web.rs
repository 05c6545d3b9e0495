// file: web.rs
// desc: recognizer component, pointer/touch translation and model fetch

use image::{RgbaImage, imageops};
use leptos::*;
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use wasm_bindgen_futures::JsFuture;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, ImageData, MouseEvent, Response, TouchEvent};

use crate::AppConfig;
use crate::canvas::{ClientRect, Point, Region, SURFACE_SIZE};
use crate::error::{RecognizerError, Result};
use crate::inference::{ModelStatus, Prediction, Recognizer};
use crate::model::DigitClassifier;

#[component]
fn DigitRecognizer(config: AppConfig) -> impl IntoView {
    let canvas_ref = create_node_ref::<leptos::html::Canvas>();
    let recognizer = store_value(Recognizer::<DigitClassifier>::new());
    let (prediction, set_prediction) = create_signal::<Option<Prediction>>(None);
    let (status, set_status) = create_signal(ModelStatus::Loading);

    let canvas_context = create_memo(move |_| {
        canvas_ref.get().and_then(|canvas| {
            let canvas_element = canvas.unchecked_ref::<HtmlCanvasElement>();
            canvas_element
                .get_context("2d")
                .ok()?
                .and_then(|ctx| ctx.dyn_into::<CanvasRenderingContext2d>().ok())
        })
    });

    let sync = move || {
        recognizer.with_value(|r| {
            set_prediction.set(r.prediction());
            set_status.set(r.model_status());
        });
    };

    let repaint = move |region: Region| {
        if let Some(ctx) = canvas_context.get_untracked() {
            recognizer.with_value(|r| paint_region(&ctx, r.surface().pixels(), region));
        }
    };

    create_effect(move |_| {
        if canvas_context.get().is_some() {
            let full = recognizer.with_value(|r| r.surface().full_region());
            repaint(full);
        }
    });

    // Load the model once on mount
    create_effect(move |_| {
        let timeout_ms = config.load_timeout_ms;
        schedule_timeout(timeout_ms, move || {
            if recognizer.try_update_value(|r| r.time_out_model(timeout_ms)) == Some(true) {
                sync();
            }
        });

        spawn_local(async move {
            log::info!("Loading digit model from {}", config.model_url);
            let loaded = fetch_bytes(config.model_url)
                .await
                .and_then(DigitClassifier::from_record_bytes);
            recognizer.update_value(|r| {
                r.publish_model(loaded);
            });
            sync();
        });
    });

    let surface_point = move |client_x: f64, client_y: f64| -> Option<Point> {
        let canvas = canvas_ref.get_untracked()?;
        let rect = canvas.unchecked_ref::<HtmlCanvasElement>().get_bounding_client_rect();
        let rect = ClientRect {
            left: rect.left(),
            top: rect.top(),
            width: rect.width(),
            height: rect.height(),
        };
        Some(Point::from_client(client_x, client_y, rect, SURFACE_SIZE))
    };

    let start_stroke = move |client_x: f64, client_y: f64| {
        if let Some(point) = surface_point(client_x, client_y) {
            recognizer.update_value(|r| r.begin_stroke(point));
        }
    };

    let extend_stroke = move |client_x: f64, client_y: f64| {
        let Some(point) = surface_point(client_x, client_y) else {
            return;
        };
        if let Some(region) = recognizer.try_update_value(|r| r.extend_stroke(point)).flatten() {
            repaint(region);
        }
    };

    let finish_stroke = move || {
        let Some(job) = recognizer.try_update_value(|r| r.end_stroke()).flatten() else {
            return;
        };

        spawn_local(async move {
            let outcome = job.run();
            recognizer.update_value(|r| {
                r.apply(outcome);
            });
            sync();
        });
    };

    let clear_canvas = move |_| {
        recognizer.update_value(|r| r.clear());
        let full = recognizer.with_value(|r| r.surface().full_region());
        repaint(full);
        sync();
    };

    view! {
        <div class="recognizer">
            <div class="drawing-container">
                <p class="hint">"Draw a digit (0-9) below!"</p>
                <div class="canvas-container">
                    <canvas
                        class="drawing-canvas"
                        _ref=canvas_ref
                        width=SURFACE_SIZE.to_string()
                        height=SURFACE_SIZE.to_string()
                        on:mousedown=move |e: MouseEvent| start_stroke(e.client_x() as f64, e.client_y() as f64)
                        on:mousemove=move |e: MouseEvent| extend_stroke(e.client_x() as f64, e.client_y() as f64)
                        on:mouseup=move |_| finish_stroke()
                        on:mouseleave=move |_| finish_stroke()
                        on:touchstart=move |e: TouchEvent| {
                            e.prevent_default();
                            if let Some((x, y)) = primary_touch(&e) {
                                start_stroke(x, y);
                            }
                        }
                        on:touchmove=move |e: TouchEvent| {
                            e.prevent_default();
                            if let Some((x, y)) = primary_touch(&e) {
                                extend_stroke(x, y);
                            }
                        }
                        on:touchend=move |e: TouchEvent| {
                            e.prevent_default();
                            finish_stroke();
                        }
                    />
                </div>
                <div class="controls">
                    <button on:click=clear_canvas>"Clear"</button>
                </div>
            </div>

            <div class="prediction">
                {move || match (status.get(), prediction.get()) {
                    (ModelStatus::Loading, _) => view! {
                        <p class="status">"Loading model..."</p>
                    }.into_view(),
                    (ModelStatus::Failed, _) => view! {
                        <p class="status">"Digit recognizer unavailable"</p>
                    }.into_view(),
                    (ModelStatus::Ready, None) => view! {
                        <p class="status">"Draw to predict"</p>
                    }.into_view(),
                    (ModelStatus::Ready, Some(p)) => view! {
                        <p class="caption">"I think it's a"</p>
                        <p class="digit">{p.digit}</p>
                        <div class="confidence-track">
                            <div class="confidence-bar" style=format!("width: {:.0}%", p.confidence)></div>
                        </div>
                        <p class="confidence">{format!("({})", p.confidence_label())}</p>
                    }.into_view(),
                }}
            </div>
        </div>
    }
}

// Only the first contact point drives the stroke
fn primary_touch(event: &TouchEvent) -> Option<(f64, f64)> {
    let touch = event.touches().get(0)?;
    Some((touch.client_x() as f64, touch.client_y() as f64))
}

fn paint_region(ctx: &CanvasRenderingContext2d, pixels: &RgbaImage, region: Region) {
    let patch = imageops::crop_imm(pixels, region.x, region.y, region.width, region.height).to_image();

    let image_data = match ImageData::new_with_u8_clamped_array_and_sh(
        Clamped(patch.as_raw().as_slice()),
        region.width,
        region.height,
    ) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Failed to build canvas image data: {:?}", e);
            return;
        }
    };

    if let Err(e) = ctx.put_image_data(&image_data, region.x as f64, region.y as f64) {
        log::error!("Failed to paint canvas: {:?}", e);
    }
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let load_error = |e: JsValue| RecognizerError::ModelLoad(format!("{:?}", e));

    let response: Response = JsFuture::from(window().fetch_with_str(url))
        .await
        .map_err(load_error)?
        .dyn_into()
        .map_err(load_error)?;

    if !response.ok() {
        return Err(RecognizerError::ModelLoad(format!(
            "{} returned HTTP {}",
            url,
            response.status()
        )));
    }

    let buffer = JsFuture::from(response.array_buffer().map_err(load_error)?)
        .await
        .map_err(load_error)?;

    Ok(js_sys::Uint8Array::new(&buffer).to_vec())
}

fn schedule_timeout(after_ms: u32, callback: impl FnOnce() + 'static) {
    let closure = Closure::once(callback);

    match window().set_timeout_with_callback_and_timeout_and_arguments_0(
        closure.as_ref().unchecked_ref(),
        after_ms as i32,
    ) {
        Ok(_) => closure.forget(),
        Err(e) => log::warn!("Could not arm model load timeout: {:?}", e),
    }
}

#[component]
pub fn App(config: AppConfig) -> impl IntoView {
    view! {
        <div class="app">
            <h1>"Try It Yourself!"</h1>
            <p>"Draw a number and watch a bit of machine learning happen."</p>
            <DigitRecognizer config=config/>
        </div>
    }
}

fn window() -> web_sys::Window {
    web_sys::window().expect("no window")
}
