#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use flate2::write::GzEncoder;
use flate2::Compression;
use nifti_overlay_viewer::error::NetworkError;
use nifti_overlay_viewer::net::{FetchReply, FetchRequest, Fetcher, ReplySender, Resource};

pub const DT_UINT8: i16 = 2;
pub const DT_INT16: i16 = 4;
pub const DT_FLOAT32: i16 = 16;

/// Builds a little-endian single-file NIfTI-1 image in memory.
#[derive(Clone)]
pub struct NiftiBuilder {
    dims: Vec<usize>,
    spacing: [f32; 3],
    datatype: i16,
    bitpix: i16,
    vox_offset: f32,
    scl_slope: f32,
    scl_inter: f32,
    data: Vec<u8>,
}

impl NiftiBuilder {
    pub fn f32(dims: &[usize], values: &[f32]) -> Self {
        Self::raw(dims, DT_FLOAT32, 32, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    pub fn u8(dims: &[usize], values: &[u8]) -> Self {
        Self::raw(dims, DT_UINT8, 8, values.to_vec())
    }

    pub fn i16(dims: &[usize], values: &[i16]) -> Self {
        Self::raw(dims, DT_INT16, 16, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    pub fn raw(dims: &[usize], datatype: i16, bitpix: i16, data: Vec<u8>) -> Self {
        Self {
            dims: dims.to_vec(),
            spacing: [1.0; 3],
            datatype,
            bitpix,
            vox_offset: 352.0,
            scl_slope: 1.0,
            scl_inter: 0.0,
            data,
        }
    }

    /// Header value only; the 4 extension bytes are always written.
    pub fn vox_offset(mut self, vox_offset: f32) -> Self {
        self.vox_offset = vox_offset;
        self
    }

    pub fn scaling(mut self, slope: f32, inter: f32) -> Self {
        self.scl_slope = slope;
        self.scl_inter = inter;
        self
    }

    pub fn spacing(mut self, spacing: [f32; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = vec![0u8; 348];
        put_i32(&mut header, 0, 348);
        put_i16(&mut header, 40, self.dims.len() as i16);
        for (i, d) in self.dims.iter().enumerate() {
            put_i16(&mut header, 42 + 2 * i, *d as i16);
        }
        for i in self.dims.len()..7 {
            put_i16(&mut header, 42 + 2 * i, 1);
        }
        put_i16(&mut header, 70, self.datatype);
        put_i16(&mut header, 72, self.bitpix);
        put_f32(&mut header, 76, 1.0);
        for (i, s) in self.spacing.iter().enumerate() {
            put_f32(&mut header, 80 + 4 * i, *s);
        }
        put_f32(&mut header, 108, self.vox_offset);
        put_f32(&mut header, 112, self.scl_slope);
        put_f32(&mut header, 116, self.scl_inter);
        header[344..348].copy_from_slice(b"n+1\0");

        let mut out = header;
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn build_gz(&self) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&self.build()).unwrap();
        encoder.finish().unwrap()
    }
}

fn put_i16(buf: &mut [u8], at: usize, v: i16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_i32(buf: &mut [u8], at: usize, v: i32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut [u8], at: usize, v: f32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// A float volume on the 2 mm MNI grid holding `value` everywhere.
pub fn mni_volume(value: f32) -> Vec<u8> {
    let n = 91 * 109 * 91;
    NiftiBuilder::f32(&[91, 109, 91], &vec![value; n])
        .spacing([2.0; 3])
        .build_gz()
}

/// Records requests instead of performing them; the test completes them.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    pub requests: Rc<RefCell<Vec<(FetchRequest, ReplySender)>>>,
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: FetchRequest, reply: ReplySender) {
        self.requests.borrow_mut().push((request, reply));
    }
}

impl ScriptedFetcher {
    pub fn len(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn url(&self, index: usize) -> String {
        self.requests.borrow()[index].0.url.clone()
    }

    pub fn resource(&self, index: usize) -> Resource {
        self.requests.borrow()[index].0.resource
    }

    pub fn is_cancelled(&self, index: usize) -> bool {
        self.requests.borrow()[index].0.cancel.is_cancelled()
    }

    /// Index of the most recent request for `resource`.
    pub fn last(&self, resource: Resource) -> usize {
        self.requests
            .borrow()
            .iter()
            .rposition(|(r, _)| r.resource == resource)
            .expect("no request for resource")
    }

    pub fn respond(&self, index: usize, result: Result<Vec<u8>, NetworkError>) {
        let requests = self.requests.borrow();
        let (request, reply) = &requests[index];
        reply
            .send(FetchReply::for_request(request, result))
            .expect("session dropped");
    }

    pub fn ok(&self, index: usize, body: Vec<u8>) {
        self.respond(index, Ok(body));
    }

    pub fn fail(&self, index: usize, status: u16) {
        let url = self.url(index);
        self.respond(
            index,
            Err(NetworkError::Status {
                url,
                status,
                body: "boom".to_string(),
            }),
        );
    }
}
