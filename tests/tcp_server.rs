mod support;

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reactorio::{EventLoop, InetAddr, ServerOption, TcpServer};

use support::{free_port, init, spawn_loop};

fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

#[test]
fn echo_under_single_threaded_mode() {
    init();
    let port = free_port();
    let addr = InetAddr::loopback(port);

    let (event_loop, _handle) = spawn_loop(move |event_loop: &Arc<EventLoop>| {
        let server = TcpServer::new(event_loop.clone(), addr, "echo", ServerOption::NoReusePort)
            .expect("failed to bind server");
        server.set_thread_num(0);
        server.set_message_callback(Arc::new(|conn, buf, _time| {
            let data = buf.retrieve_all_as_vec();
            conn.send(&data);
        }));
        server.start();
        // `setup` doesn't outlive the loop thread's startup, but the
        // acceptor's callbacks only work while something keeps the server
        // alive; leak it for the run's duration rather than threading an
        // extra handle through `spawn_loop`.
        std::mem::forget(server);
    });

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream.write_all(b"hello").unwrap();

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    drop(stream);
    event_loop.quit();
}

#[test]
fn round_robin_distributes_across_workers() {
    init();
    let port = free_port();
    let addr = InetAddr::loopback(port);

    let worker_order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let connection_order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let worker_order_for_init = worker_order.clone();
    let connection_order_for_conn = connection_order.clone();

    let (event_loop, _handle) = spawn_loop(move |event_loop: &Arc<EventLoop>| {
        let server = TcpServer::new(event_loop.clone(), addr, "rr", ServerOption::NoReusePort)
            .expect("failed to bind server");
        server.set_thread_num(3);
        server.set_thread_init_callback(Arc::new(move |worker_loop| {
            worker_order_for_init
                .lock()
                .unwrap()
                .push(Arc::as_ptr(worker_loop) as usize);
        }));
        server.set_connection_callback(Arc::new(move |conn| {
            if conn.connected() {
                connection_order_for_conn
                    .lock()
                    .unwrap()
                    .push(Arc::as_ptr(&conn.get_loop()) as usize);
            }
        }));
        server.set_message_callback(Arc::new(|conn, buf, _time| {
            let data = buf.retrieve_all_as_vec();
            conn.send(&data);
        }));
        server.start();
        std::mem::forget(server);
    });

    for _ in 0..6 {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
        stream.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).unwrap();
    }

    assert!(wait_until(
        || connection_order.lock().unwrap().len() == 6,
        Duration::from_secs(2)
    ));

    let workers = worker_order.lock().unwrap().clone();
    let seen = connection_order.lock().unwrap().clone();
    assert_eq!(workers.len(), 3);
    let expected = vec![
        workers[0], workers[1], workers[2], workers[0], workers[1], workers[2],
    ];
    assert_eq!(seen, expected);

    event_loop.quit();
}

#[test]
fn high_water_mark_fires_once_on_crossing() {
    init();
    let port = free_port();
    let addr = InetAddr::loopback(port);

    let crossings = Arc::new(AtomicUsize::new(0));
    let crossings_for_cb = crossings.clone();

    let (event_loop, _handle) = spawn_loop(move |event_loop: &Arc<EventLoop>| {
        let server = TcpServer::new(event_loop.clone(), addr, "hwm", ServerOption::NoReusePort)
            .expect("failed to bind server");
        server.set_thread_num(0);
        server.set_connection_callback(Arc::new(move |conn| {
            if conn.connected() {
                let crossings = crossings_for_cb.clone();
                conn.set_high_water_mark_callback(
                    Arc::new(move |_conn, _pending| {
                        crossings.fetch_add(1, Ordering::SeqCst);
                    }),
                    1024,
                );
                // A single oversized send overruns the kernel send buffer
                // in one write(2), crossing the threshold immediately.
                let payload = vec![0u8; 2 * 1024 * 1024];
                conn.send(&payload);
            }
        }));
        server.start();
        std::mem::forget(server);
    });

    // Connect but never read: the peer's receive window stays small and
    // the server's single write(2) cannot drain the whole payload.
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");

    assert!(wait_until(
        || crossings.load(Ordering::SeqCst) >= 1,
        Duration::from_secs(2)
    ));
    assert_eq!(crossings.load(Ordering::SeqCst), 1);

    drop(stream);
    event_loop.quit();
}

#[test]
fn half_close_delivers_full_message_before_close_callback() {
    init();
    let port = free_port();
    let addr = InetAddr::loopback(port);

    const SIZE: usize = 1024 * 1024;
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicUsize::new(0));

    let received_for_msg = received.clone();
    let received_for_close = received.clone();
    let closed_for_cb = closed.clone();

    let (event_loop, _handle) = spawn_loop(move |event_loop: &Arc<EventLoop>| {
        let server = TcpServer::new(event_loop.clone(), addr, "half-close", ServerOption::NoReusePort)
            .expect("failed to bind server");
        server.set_thread_num(0);
        server.set_message_callback(Arc::new(move |_conn, buf, _time| {
            let mut chunk = buf.retrieve_all_as_vec();
            received_for_msg.lock().unwrap().append(&mut chunk);
        }));
        server.set_connection_callback(Arc::new(move |conn| {
            if !conn.connected() {
                // handle_close fires the connection callback only after the
                // input buffer has delivered everything read(2) returned.
                assert_eq!(received_for_close.lock().unwrap().len(), SIZE);
                closed_for_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));
        server.start();
        std::mem::forget(server);
    });

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    let payload = vec![7u8; SIZE];
    stream.write_all(&payload).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    assert!(wait_until(
        || closed.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5)
    ));
    assert_eq!(received.lock().unwrap().len(), SIZE);
    assert!(received.lock().unwrap().iter().all(|&b| b == 7));

    drop(stream);
    event_loop.quit();
}

#[test]
fn send_from_a_foreign_thread_preserves_order() {
    init();
    let port = free_port();
    let addr = InetAddr::loopback(port);

    let (event_loop, _handle) = spawn_loop(move |event_loop: &Arc<EventLoop>| {
        let server = TcpServer::new(event_loop.clone(), addr, "xthread", ServerOption::NoReusePort)
            .expect("failed to bind server");
        server.set_thread_num(0);
        server.set_connection_callback(Arc::new(|conn| {
            if conn.connected() {
                let conn = conn.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        conn.send(b"x");
                    }
                });
            }
        }));
        server.start();
        std::mem::forget(server);
    });

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    let mut received = vec![0u8; 1000];
    stream.read_exact(&mut received).unwrap();
    assert!(received.iter().all(|&b| b == b'x'));

    drop(stream);
    event_loop.quit();
}

#[test]
fn quit_from_a_foreign_thread_stops_the_loop_promptly() {
    init();
    let (event_loop, handle) = spawn_loop(|_event_loop: &Arc<EventLoop>| {});

    let start = Instant::now();
    event_loop.quit();
    handle.join().expect("loop thread panicked");
    assert!(start.elapsed() < Duration::from_secs(2));
}
