//! C ABI for host processes.
//!
//! Every function here works against one process-wide [`ModelRegistry`]
//! created on first use with the default backend. Failures return a status
//! of -1 (or a null pointer) and leave a message for [`grove_last_error`]
//! on the calling thread.
//!
//! Strings and buffers handed out by this module are owned by the caller
//! and must be returned through [`grove_free`], [`grove_free_result`] or
//! [`grove_free_metadata`].

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::sync::OnceLock;

use crate::engine::default_backend;
use crate::error::{Error, Result};
use crate::model::{ModelInfo, ModelRegistry};
use crate::VERSION;

static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// The registry behind the C ABI.
pub fn registry() -> &'static ModelRegistry {
    REGISTRY.get_or_init(|| {
        let backend = default_backend();
        log::info!("Initializing model registry with '{}' backend", backend.name());
        ModelRegistry::new(backend)
    })
}

/// Prediction output handed across the C boundary.
///
/// `data` holds `len` values laid out as `rows` x `cols`, or is null when
/// `status` is -1.
#[repr(C)]
#[derive(Debug)]
pub struct GroveInferenceResult {
    pub data: *mut f32,
    pub len: usize,
    pub rows: usize,
    pub cols: usize,
    /// 0 on success, -1 on failure
    pub status: i32,
}

impl GroveInferenceResult {
    pub fn error() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
            rows: 0,
            cols: 0,
            status: -1,
        }
    }

    /// Move `values` onto the heap as a `rows` x `cols` result.
    fn from_values(values: Vec<f32>, rows: usize) -> Self {
        let len = values.len();
        let rows = if rows > 0 && len % rows == 0 { rows } else { 1 };
        let data = Box::into_raw(values.into_boxed_slice()) as *mut f32;
        Self {
            data,
            len,
            rows,
            cols: len / rows,
            status: 0,
        }
    }
}

/// Shapes of a loaded model's first input and output.
///
/// Dynamic dimensions are -1. All pointers are null when the lookup failed.
#[repr(C)]
#[derive(Debug)]
pub struct GroveModelMetadata {
    pub input_shape: *mut i64,
    pub input_shape_len: usize,
    pub output_shape: *mut i64,
    pub output_shape_len: usize,
    pub input_count: usize,
    pub output_count: usize,
}

impl GroveModelMetadata {
    pub fn error() -> Self {
        Self {
            input_shape: std::ptr::null_mut(),
            input_shape_len: 0,
            output_shape: std::ptr::null_mut(),
            output_shape_len: 0,
            input_count: 0,
            output_count: 0,
        }
    }

    fn from_info(info: ModelInfo) -> Self {
        let input_shape_len = info.input_shape.len();
        let output_shape_len = info.output_shape.len();
        Self {
            input_shape: Box::into_raw(info.input_shape.into_boxed_slice()) as *mut i64,
            input_shape_len,
            output_shape: Box::into_raw(info.output_shape.into_boxed_slice()) as *mut i64,
            output_shape_len,
            input_count: 1,
            output_count: 1,
        }
    }
}

fn set_last_error(err: &Error) {
    let message = CString::new(err.to_string())
        .unwrap_or_else(|_| CString::new("error message contained a NUL byte").unwrap_or_default());
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Run `op`, recording its error for `grove_last_error`.
fn capture<T>(op: impl FnOnce() -> Result<T>) -> Option<T> {
    clear_last_error();
    match op() {
        Ok(value) => Some(value),
        Err(e) => {
            set_last_error(&e);
            None
        }
    }
}

/// Borrow a C string argument as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for `'a`.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::InvalidArgument(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| Error::InvalidArgument(format!("{} is not valid UTF-8", what)))
}

fn into_c_string(s: String) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Message of the last failure on this thread, or null.
///
/// The pointer stays valid until the next Grove call on the same thread and
/// must not be freed.
#[no_mangle]
pub extern "C" fn grove_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| match *cell.borrow() {
        Some(ref message) => message.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Load the model at `path` (file path or URL) under `name`.
///
/// Returns 0 on success and -1 on failure.
///
/// # Safety
///
/// `name` and `path` must be null or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn grove_load_model(name: *const c_char, path: *const c_char) -> i32 {
    let loaded = capture(|| {
        let name = str_arg(name, "model name")?;
        let path = str_arg(path, "model path")?;
        registry().load(name, path)
    });
    if loaded.is_some() {
        0
    } else {
        -1
    }
}

/// Unload `name`. Unknown names succeed.
///
/// Returns 0, or -1 if `name` is null or not UTF-8.
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn grove_unload_model(name: *const c_char) -> i32 {
    let unloaded = capture(|| {
        let name = str_arg(name, "model name")?;
        registry().unload(name);
        Ok(())
    });
    if unloaded.is_some() {
        0
    } else {
        -1
    }
}

/// Predict on a row-major `rows` x `cols` matrix of features.
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string, and `data` must be
/// null or point to `rows * cols` readable `f32` values.
#[no_mangle]
pub unsafe extern "C" fn grove_predict(
    name: *const c_char,
    data: *const f32,
    rows: usize,
    cols: usize,
) -> GroveInferenceResult {
    capture(|| {
        let name = str_arg(name, "model name")?;
        if data.is_null() {
            return Err(Error::InvalidArgument("input data is null".into()));
        }
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidArgument(format!("{} x {} input overflows", rows, cols)))?;
        let inputs = std::slice::from_raw_parts(data, len);

        let output = registry().predict(name, inputs)?;
        Ok(GroveInferenceResult::from_values(output, rows))
    })
    .unwrap_or_else(GroveInferenceResult::error)
}

/// Predict on a BLOB of packed native-endian `f32` values.
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string, and `data` must be
/// null or point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn grove_predict_blob(
    name: *const c_char,
    data: *const u8,
    len: usize,
) -> GroveInferenceResult {
    capture(|| {
        let name = str_arg(name, "model name")?;
        if data.is_null() {
            return Err(Error::InvalidArgument("BLOB data is null".into()));
        }
        let blob = std::slice::from_raw_parts(data, len);

        let output = registry().predict_blob(name, blob)?;
        Ok(GroveInferenceResult::from_values(output, 1))
    })
    .unwrap_or_else(GroveInferenceResult::error)
}

/// JSON array of loaded model names.
#[no_mangle]
pub extern "C" fn grove_list_models() -> *mut c_char {
    capture(|| registry().list_loaded_json())
        .map(into_c_string)
        .unwrap_or(std::ptr::null_mut())
}

/// JSON metadata for `name`, or `{"error": "..."}`.
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn grove_model_info(name: *const c_char) -> *mut c_char {
    let json = capture(|| {
        let name = str_arg(name, "model name")?;
        let info = registry().model_info(name)?;
        Ok(serde_json::to_string(&info)?)
    })
    .unwrap_or_else(|| {
        let message = LAST_ERROR.with(|cell| {
            cell.borrow()
                .as_ref()
                .map(|m| m.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        serde_json::json!({ "error": message }).to_string()
    });
    into_c_string(json)
}

/// Input and output shapes for `name`.
///
/// On failure every pointer is null and `grove_last_error` holds the reason.
/// Release with [`grove_free_metadata`].
///
/// # Safety
///
/// `name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn grove_model_metadata(name: *const c_char) -> GroveModelMetadata {
    capture(|| {
        let name = str_arg(name, "model name")?;
        registry().model_info(name).map(GroveModelMetadata::from_info)
    })
    .unwrap_or_else(GroveModelMetadata::error)
}

/// JSON document describing this build.
#[no_mangle]
pub extern "C" fn grove_version() -> *mut c_char {
    let registry = registry();
    let doc = serde_json::json!({
        "version": VERSION,
        "backend": registry.backend().name(),
        "tract": cfg!(feature = "tract"),
        "cache_dir": registry.resolver().fetcher().cache_dir().to_string_lossy(),
    });
    into_c_string(doc.to_string())
}

/// Delete all downloaded models. Returns 0 on success and -1 on failure.
#[no_mangle]
pub extern "C" fn grove_clear_cache() -> i32 {
    if capture(|| registry().clear_cache()).is_some() {
        0
    } else {
        -1
    }
}

/// Release every loaded model. Returns how many were released.
#[no_mangle]
pub extern "C" fn grove_shutdown() -> usize {
    clear_last_error();
    match REGISTRY.get() {
        Some(registry) => registry.clear(),
        None => 0,
    }
}

/// Free a string returned by this library.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by a Grove function that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn grove_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Free the buffer inside a prediction result.
///
/// # Safety
///
/// `result` must have been returned by `grove_predict` or
/// `grove_predict_blob` and not freed yet.
#[no_mangle]
pub unsafe extern "C" fn grove_free_result(result: GroveInferenceResult) {
    if !result.data.is_null() {
        let slice: *mut [f32] = std::ptr::slice_from_raw_parts_mut(result.data, result.len);
        drop(Box::from_raw(slice));
    }
}

/// Free the shape buffers inside a metadata struct.
///
/// # Safety
///
/// `metadata` must have been returned by `grove_model_metadata` and not
/// freed yet.
#[no_mangle]
pub unsafe extern "C" fn grove_free_metadata(metadata: GroveModelMetadata) {
    for (ptr, len) in [
        (metadata.input_shape, metadata.input_shape_len),
        (metadata.output_shape, metadata.output_shape_len),
    ] {
        if !ptr.is_null() {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
        }
    }
}
