use anyhow::{anyhow, Context, Result};
use libloading::Library;
use once_cell::sync::OnceCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::time::Duration;
use crate::drivers::buffer::AcquisitionBuffer;
use crate::drivers::source::{ConfigValue, DeviceSession};
use crate::drivers::ProdTestError;
#[cfg(target_os = "windows")]
const LIB_CANDIDATES: &[&str] = &["libiio.dll"];
#[cfg(target_os = "macos")]
const LIB_CANDIDATES: &[&str] = &["iio.framework/iio", "libiio.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const LIB_CANDIDATES: &[&str] = &["libiio.so.0", "libiio.so"];
const ETIMEDOUT: isize = 110;
const ATTR_BUF_LEN: usize = 256;
type Ctx = *mut c_void;
type Dev = *mut c_void;
type Chn = *mut c_void;
type Buf = *mut c_void;
struct IioApi {
    #[allow(dead_code)]
    lib: Library,
    create_context_from_uri: unsafe extern "C" fn(*const c_char) -> Ctx,
    context_destroy: unsafe extern "C" fn(Ctx),
    context_set_timeout: unsafe extern "C" fn(Ctx, c_uint) -> c_int,
    context_find_device: unsafe extern "C" fn(Ctx, *const c_char) -> Dev,
    device_attr_write: unsafe extern "C" fn(Dev, *const c_char, *const c_char) -> isize,
    device_attr_read: unsafe extern "C" fn(Dev, *const c_char, *mut c_char, usize) -> isize,
    device_find_channel: unsafe extern "C" fn(Dev, *const c_char, bool) -> Chn,
    channel_attr_write: unsafe extern "C" fn(Chn, *const c_char, *const c_char) -> isize,
    channel_attr_read: unsafe extern "C" fn(Chn, *const c_char, *mut c_char, usize) -> isize,
    channel_enable: unsafe extern "C" fn(Chn),
    channel_disable: unsafe extern "C" fn(Chn),
    device_create_buffer: unsafe extern "C" fn(Dev, usize, bool) -> Buf,
    buffer_refill: unsafe extern "C" fn(Buf) -> isize,
    channel_read: unsafe extern "C" fn(Chn, Buf, *mut c_void, usize) -> usize,
    buffer_destroy: unsafe extern "C" fn(Buf),
}
impl IioApi {
    fn load() -> Result<Self> {
        let lib = LIB_CANDIDATES
            .iter()
            .find_map(|name| unsafe { Library::new(name) }.ok())
            .ok_or_else(|| anyhow!("libiio not found (tried {})", LIB_CANDIDATES.join(", ")))?;
        // Safety: signatures follow the libiio 0.x C API.
        unsafe {
            Ok(Self {
                create_context_from_uri: *lib.get(b"iio_create_context_from_uri\0")?,
                context_destroy: *lib.get(b"iio_context_destroy\0")?,
                context_set_timeout: *lib.get(b"iio_context_set_timeout\0")?,
                context_find_device: *lib.get(b"iio_context_find_device\0")?,
                device_attr_write: *lib.get(b"iio_device_attr_write\0")?,
                device_attr_read: *lib.get(b"iio_device_attr_read\0")?,
                device_find_channel: *lib.get(b"iio_device_find_channel\0")?,
                channel_attr_write: *lib.get(b"iio_channel_attr_write\0")?,
                channel_attr_read: *lib.get(b"iio_channel_attr_read\0")?,
                channel_enable: *lib.get(b"iio_channel_enable\0")?,
                channel_disable: *lib.get(b"iio_channel_disable\0")?,
                device_create_buffer: *lib.get(b"iio_device_create_buffer\0")?,
                buffer_refill: *lib.get(b"iio_buffer_refill\0")?,
                channel_read: *lib.get(b"iio_channel_read\0")?,
                buffer_destroy: *lib.get(b"iio_buffer_destroy\0")?,
                lib,
            })
        }
    }
    fn instance() -> Result<&'static IioApi> {
        static API: OnceCell<IioApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
}
/// Attribute address parsed from `[device:][channel/]attr`.
#[derive(Debug, PartialEq, Eq)]
struct AttrKey<'a> {
    device: Option<&'a str>,
    channel: Option<&'a str>,
    attr: &'a str,
}
impl<'a> AttrKey<'a> {
    fn parse(key: &'a str) -> Self {
        let (device, rest) = match key.split_once(':') {
            Some((dev, rest)) => (Some(dev), rest),
            None => (None, key),
        };
        let (channel, attr) = match rest.rsplit_once('/') {
            Some((chn, attr)) => (Some(chn), attr),
            None => (None, rest),
        };
        Self {
            device,
            channel,
            attr,
        }
    }
}
fn cstring(s: &str) -> Result<CString> {
    CString::new(s).with_context(|| format!("{s:?} contains a NUL byte"))
}
fn unavailable(err: anyhow::Error) -> ProdTestError {
    ProdTestError::DeviceUnavailable(format!("{err:#}"))
}
/// libiio-backed session on a local or network IIO context.
///
/// Keys for [`DeviceSession::set_config`] and [`DeviceSession::read_value`]
/// use `[device:][channel/]attr`: `sampling_frequency` targets the ADC,
/// `voltage0/raw` one of its channels, `one-bit-adc-dac:voltage2/raw` a
/// channel of another device in the same context.
pub struct IioSession {
    api: &'static IioApi,
    uri: String,
    ctx: Ctx,
    adc: Dev,
    capture: Chn,
    vref: f64,
}
impl IioSession {
    /// Opens `uri` and locates the ADC `adc_name`, whose codes span `vref`.
    pub fn connect(
        uri: &str,
        adc_name: &str,
        vref: f64,
        timeout: Duration,
    ) -> Result<Self, ProdTestError> {
        Self::open(uri, adc_name, vref, timeout).map_err(unavailable)
    }
    fn open(uri: &str, adc_name: &str, vref: f64, timeout: Duration) -> Result<Self> {
        let api = IioApi::instance()?;
        let c_uri = cstring(uri)?;
        let ctx = unsafe { (api.create_context_from_uri)(c_uri.as_ptr()) };
        if ctx.is_null() {
            return Err(anyhow!("cannot open IIO context {uri}"));
        }
        // from here on Drop releases the context
        let mut session = Self {
            api,
            uri: uri.to_string(),
            ctx,
            adc: std::ptr::null_mut(),
            capture: std::ptr::null_mut(),
            vref,
        };
        let ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);
        let rc = unsafe { (api.context_set_timeout)(ctx, ms) };
        if rc < 0 {
            return Err(anyhow!("iio_context_set_timeout failed ({rc})"));
        }
        session.adc = session.find_device(adc_name)?;
        session.capture = session.find_channel(session.adc, "voltage0", false)?;
        log::info!("connected to {adc_name} at {uri}");
        Ok(session)
    }
    pub fn uri(&self) -> &str {
        &self.uri
    }
    fn find_device(&self, name: &str) -> Result<Dev> {
        let c_name = cstring(name)?;
        let dev = unsafe { (self.api.context_find_device)(self.ctx, c_name.as_ptr()) };
        if dev.is_null() {
            Err(anyhow!("device {name} not found in {}", self.uri))
        } else {
            Ok(dev)
        }
    }
    fn find_channel(&self, dev: Dev, name: &str, output: bool) -> Result<Chn> {
        let c_name = cstring(name)?;
        let chn = unsafe { (self.api.device_find_channel)(dev, c_name.as_ptr(), output) };
        if chn.is_null() {
            Err(anyhow!("channel {name} not found"))
        } else {
            Ok(chn)
        }
    }
    /// Input channel first, then output channel of the same name.
    fn find_any_channel(&self, dev: Dev, name: &str) -> Result<Chn> {
        self.find_channel(dev, name, false)
            .or_else(|_| self.find_channel(dev, name, true))
    }
    fn write_attr(&self, key: &str, value: &str) -> Result<()> {
        let parsed = AttrKey::parse(key);
        let dev = match parsed.device {
            Some(name) => self.find_device(name)?,
            None => self.adc,
        };
        let attr = cstring(parsed.attr)?;
        let src = cstring(value)?;
        let rc = match parsed.channel {
            Some(chn) => {
                let chn = self.find_any_channel(dev, chn)?;
                unsafe { (self.api.channel_attr_write)(chn, attr.as_ptr(), src.as_ptr()) }
            }
            None => unsafe { (self.api.device_attr_write)(dev, attr.as_ptr(), src.as_ptr()) },
        };
        if rc < 0 {
            return Err(anyhow!("writing {key} = {value} failed ({rc})"));
        }
        Ok(())
    }
    fn read_attr(&self, key: &str) -> Result<String> {
        let parsed = AttrKey::parse(key);
        let dev = match parsed.device {
            Some(name) => self.find_device(name)?,
            None => self.adc,
        };
        let attr = cstring(parsed.attr)?;
        let mut buf = vec![0 as c_char; ATTR_BUF_LEN];
        let rc = match parsed.channel {
            Some(chn) => {
                let chn = self.find_any_channel(dev, chn)?;
                unsafe { (self.api.channel_attr_read)(chn, attr.as_ptr(), buf.as_mut_ptr(), buf.len()) }
            }
            None => unsafe { (self.api.device_attr_read)(dev, attr.as_ptr(), buf.as_mut_ptr(), buf.len()) },
        };
        if rc < 0 {
            return Err(anyhow!("reading {key} failed ({rc})"));
        }
        // libiio always NUL-terminates within `len`
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(text.to_string_lossy().trim().to_string())
    }
    fn read_block(&mut self, buffer_size: usize, timeout: Duration) -> Result<Vec<i64>, ProdTestError> {
        let api = self.api;
        unsafe { (api.channel_enable)(self.capture) };
        let buf = unsafe { (api.device_create_buffer)(self.adc, buffer_size, false) };
        if buf.is_null() {
            unsafe { (api.channel_disable)(self.capture) };
            return Err(ProdTestError::DeviceUnavailable(format!(
                "cannot allocate a {buffer_size}-sample buffer"
            )));
        }
        let refilled = unsafe { (api.buffer_refill)(buf) };
        let result = if refilled == -ETIMEDOUT {
            Err(ProdTestError::AcquisitionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        } else if refilled < 0 {
            Err(ProdTestError::DeviceUnavailable(format!(
                "buffer refill failed ({refilled})"
            )))
        } else {
            // samples are stored in 32-bit words, sign-extended by libiio
            let mut raw = vec![0i32; buffer_size];
            let bytes = unsafe {
                (api.channel_read)(
                    self.capture,
                    buf,
                    raw.as_mut_ptr() as *mut c_void,
                    raw.len() * std::mem::size_of::<i32>(),
                )
            };
            raw.truncate(bytes / std::mem::size_of::<i32>());
            Ok(raw.into_iter().map(i64::from).collect())
        };
        unsafe {
            (api.buffer_destroy)(buf);
            (api.channel_disable)(self.capture);
        }
        result
    }
}
impl DeviceSession for IioSession {
    fn select_channel(&mut self, channel: usize) -> Result<(), ProdTestError> {
        self.capture = self
            .find_channel(self.adc, &format!("voltage{channel}"), false)
            .map_err(|e| ProdTestError::Configuration(format!("{e:#}")))?;
        Ok(())
    }
    fn acquire(
        &mut self,
        buffer_size: usize,
        sample_rate_hz: f64,
        timeout: Duration,
    ) -> Result<AcquisitionBuffer, ProdTestError> {
        self.set_config(
            "sampling_frequency",
            &ConfigValue::Int(sample_rate_hz.round() as i64),
        )?;
        let codes = self.read_block(buffer_size, timeout)?;
        log::debug!("{} codes from {}", codes.len(), self.uri);
        Ok(AcquisitionBuffer::new(codes, sample_rate_hz, self.vref))
    }
    fn set_config(&mut self, key: &str, value: &ConfigValue) -> Result<(), ProdTestError> {
        let text = value.to_string();
        self.write_attr(key, &text).map_err(|e| {
            log::error!("{e:#}");
            ProdTestError::UnsupportedConfig {
                key: key.to_string(),
                value: text.clone(),
            }
        })
    }
    fn read_value(&mut self, key: &str) -> Result<f64, ProdTestError> {
        let text = self.read_attr(key).map_err(unavailable)?;
        text.parse::<f64>().map_err(|_| ProdTestError::UnsupportedConfig {
            key: key.to_string(),
            value: text,
        })
    }
}
impl Drop for IioSession {
    fn drop(&mut self) {
        unsafe { (self.api.context_destroy)(self.ctx) };
    }
}
